mod api;
mod config;
mod engine;
mod fetcher;
mod metrics;
mod notifications;
mod registry;
mod storage;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use config::{Cli, Config};
use engine::Engine;
use indexer_model::{Error, Index};
use log::LevelFilter;
use metrics::Metrics;
use notifications::{configure_webhook_routes, PubSubListener};
use registry::{Credentials, RegistryClient};

const RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
const REGISTRY_CONCURRENCY: usize = 16;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter(Some(module_path!()), LevelFilter::Info)
        .init();

    if cli.show_default_config {
        print_config_and_exit(&Config::default());
    }

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("failed to load configuration file: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.no_reindex {
        config.indexer.index_on_startup = false;
    }
    if cli.disable_webhook_listener {
        config.webhook_listener.listen.clear();
    }
    if cli.disable_pubsub_listener {
        config.pubsub_listener.projects.clear();
    }

    if cli.show_config {
        print_config_and_exit(&config);
    }

    if config.registries.is_empty() {
        log::error!("you must configure at least one registry to index");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn print_config_and_exit(config: &Config) -> ! {
    match config.to_yaml() {
        Ok(yaml) => {
            print!("{yaml}");
            std::process::exit(0);
        }
        Err(e) => {
            log::error!("failed to render configuration: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> Result<(), Error> {
    let mut registries = HashMap::new();
    for opts in &config.registries {
        let host = registry_host(&opts.base_url);
        let credentials = match &opts.credentials {
            Some(c) => Some(Credentials::r#static(c.username.clone(), c.password.clone())),
            None => Some(Credentials::ambient().await?),
        };
        let client = RegistryClient::connect(
            opts.base_url.clone(),
            host.clone(),
            opts.prefixes.clone(),
            credentials,
            REGISTRY_CONCURRENCY,
        )
        .await?;
        registries.insert(host, client);
    }

    let storage = storage::from_uri(&config.indexer.state_file).await?;
    let index = Arc::new(storage.load().await?);
    let metrics = Arc::new(Metrics::new());

    let engine = Engine::new(
        registries,
        index.clone(),
        metrics.clone(),
        config.indexer.queue_length as usize,
        RETRY_INTERVAL,
    );
    let handle = engine.handle();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let api_server = build_api_server(&config, index.clone(), metrics.clone(), handle.clone())?;
    let api_task = tokio::spawn(api_server);

    let webhook_task = if config.webhook_listener.enabled() {
        let server = build_webhook_server(&config, handle.clone())?;
        Some(tokio::spawn(server))
    } else {
        None
    };

    let pubsub_task = if config.pubsub_listener.enabled() {
        let credentials = Credentials::ambient().await?;
        let listener = PubSubListener::new(
            config.pubsub_listener.projects.clone(),
            Some(config.pubsub_listener.subscription.clone()),
            config.pubsub_listener.prefixes.clone(),
            credentials,
            handle.clone(),
        );
        let shutdown_rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { listener.serve(shutdown_rx).await }))
    } else {
        None
    };

    if config.indexer.index_on_startup {
        engine.index_all().await?;
    }

    let engine_task = tokio::spawn(engine.serve(shutdown_rx));

    wait_for_shutdown_signal().await;
    log::info!("shutdown requested, draining engine");
    let _ = shutdown_tx.send(true);

    let _ = engine_task.await;
    api_task.abort();
    if let Some(task) = webhook_task {
        task.abort();
    }
    if let Some(task) = pubsub_task {
        let _ = task.await;
    }

    storage.save(&index).await
}

fn registry_host(base_url: &url::Url) -> String {
    match base_url.port() {
        Some(port) => format!("{}:{port}", base_url.host_str().unwrap_or_default()),
        None => base_url.host_str().unwrap_or_default().to_string(),
    }
}

fn build_api_server(
    config: &Config,
    index: Arc<Index>,
    metrics: Arc<Metrics>,
    handle: engine::EngineHandle,
) -> Result<actix_web::dev::Server, Error> {
    use actix_cors::Cors;
    use actix_files::Files;
    use actix_web::dev::Service;
    use actix_web::middleware::Condition;
    use actix_web::{web, App, HttpServer};

    let cors_allow_all = config.api.cors_allow_all;
    let server = HttpServer::new(move || {
        let timing_metrics = metrics.clone();
        let app = App::new()
            .app_data(web::Data::new(index.clone()))
            .app_data(web::Data::new(metrics.clone()))
            .app_data(web::Data::new(handle.clone()))
            .wrap_fn(move |req, srv| {
                let metrics = timing_metrics.clone();
                let method = req.method().to_string();
                let start = std::time::Instant::now();
                let fut = srv.call(req);
                async move {
                    let res = fut.await?;
                    let path = res
                        .request()
                        .match_pattern()
                        .unwrap_or_else(|| res.request().path().to_string());
                    metrics
                        .request_duration
                        .with_label_values(&[path.as_str(), method.as_str()])
                        .observe(start.elapsed().as_secs_f64());
                    Ok(res)
                }
            })
            .configure(api::configure_routes)
            .service(Files::new("/docs", "./docs").index_file("index.html"))
            .route(
                "/",
                web::get().to(|| async {
                    actix_web::HttpResponse::MovedPermanently()
                        .append_header(("Location", "/docs/"))
                        .finish()
                }),
            )
            .wrap(Condition::new(cors_allow_all, Cors::permissive()));
        app
    })
    .bind(&config.api.listen)
    .map_err(|e| Error::Config(format!("failed to bind API listener {}: {e}", config.api.listen)))?
    .run();

    Ok(server)
}

fn build_webhook_server(
    config: &Config,
    handle: engine::EngineHandle,
) -> Result<actix_web::dev::Server, Error> {
    use actix_web::{web, App, HttpServer};
    use notifications::WebhookRegistryHost;

    let host = config.webhook_listener.registry.clone();
    let listen = config.webhook_listener.listen.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(WebhookRegistryHost(host.clone())))
            .app_data(web::Data::new(handle.clone()))
            .configure(configure_webhook_routes)
    })
    .bind(&listen)
    .map_err(|e| Error::Config(format!("failed to bind webhook listener {listen}: {e}")))?
    .run();

    Ok(server)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
