//! The indexing engine: a single-writer event loop owning all mutations
//! to the [`Index`], driven by an action queue, a periodic tainted-retry
//! sweep, and a shutdown signal.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexer_model::{Action, Error, Index, Reference};
use tokio::sync::{mpsc, watch};

use crate::fetcher;
use crate::metrics::Metrics;
use crate::registry::RegistryClient;

/// A cloneable front for submitting actions to the engine's queue. Held by
/// the webhook and pub/sub listeners and by the read API's `POST
/// /repositories/{repo}/tags` trigger endpoint.
#[derive(Clone)]
pub struct EngineHandle {
    sender: mpsc::Sender<Action>,
}

impl EngineHandle {
    /// Enqueues an action, blocking if the queue is full (the queue length
    /// bounds outstanding work, so backpressure here is deliberate).
    pub async fn enqueue(&self, action: Action) -> Result<(), Error> {
        self.sender
            .send(action)
            .await
            .map_err(|_| Error::Storage("action queue is closed".to_string()))
    }
}

/// Owns every configured registry client and the index they populate, and
/// runs the single-writer dispatch loop.
pub struct Engine {
    registries: HashMap<String, RegistryClient>,
    index: Arc<Index>,
    metrics: Arc<Metrics>,
    sender: mpsc::Sender<Action>,
    receiver: mpsc::Receiver<Action>,
    retry_interval: Duration,
}

impl Engine {
    pub fn new(
        registries: HashMap<String, RegistryClient>,
        index: Arc<Index>,
        metrics: Arc<Metrics>,
        queue_length: usize,
        retry_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_length);
        Engine {
            registries,
            index,
            metrics,
            sender,
            receiver,
            retry_interval,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            sender: self.sender.clone(),
        }
    }

    /// Runs the dispatch loop until `shutdown` reports `true`. Consumes
    /// the engine, matching the single-owner lifetime of the action
    /// receiver.
    pub async fn serve(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut tainted: HashSet<Reference> = HashSet::new();
        let mut interval = tokio::time::interval(self.retry_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_action = self.receiver.recv() => {
                    let Some(action) = maybe_action else {
                        log::warn!("action queue closed, stopping engine");
                        break;
                    };
                    self.metrics.actions_in_queue.set(self.receiver.len() as f64);
                    self.dispatch(action, &mut tainted).await;
                    self.update_images_total();
                }
                _ = interval.tick() => {
                    self.sweep_tainted(&mut tainted).await;
                    self.update_images_total();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("engine received shutdown signal");
                        break;
                    }
                }
            }
        }
    }

    async fn dispatch(&self, action: Action, tainted: &mut HashSet<Reference>) {
        log::debug!("dispatching {action}");
        match action {
            Action::IndexAll => {
                if let Err(e) = self.index_all().await {
                    log::warn!("indexing all repositories failed: {e}");
                }
            }
            Action::IndexRepository { reference } => {
                self.index_repository(&reference).await;
            }
            Action::IndexImage { reference } => {
                self.index_image(&reference, tainted).await;
            }
            Action::DeleteImage { reference } => {
                self.index.delete_image(&reference);
                tainted.remove(&reference);
            }
        }
    }

    /// Crawls every configured registry and replaces the index's full
    /// catalog in one atomic swap. A failure on any registry aborts the
    /// whole crawl and leaves the previous index untouched, since a
    /// partial replacement would silently drop the repositories of
    /// registries not yet visited.
    pub async fn index_all(&self) -> Result<(), Error> {
        let mut all = HashMap::new();
        for (host, client) in &self.registries {
            let repositories = fetcher::fetch_repositories(client)
                .await
                .map_err(|e| Error::Upstream(format!("indexing all repositories on {host} failed: {e}")))?;
            for repository in repositories {
                all.insert(repository.name.clone(), repository);
            }
        }
        self.index.replace_all_repositories(all);
        Ok(())
    }

    async fn index_repository(&self, reference: &Reference) {
        let Some(client) = self.registries.get(reference.host()) else {
            log::warn!("{reference}: no registry configured for host");
            return;
        };
        match fetcher::fetch_repository(client, reference).await {
            Ok(repository) => self.index.replace_repository(repository),
            Err(e) => log::warn!("indexing repository {reference} failed: {e}"),
        }
    }

    async fn index_image(&self, reference: &Reference, tainted: &mut HashSet<Reference>) {
        let Some(client) = self.registries.get(reference.host()) else {
            log::warn!("{reference}: no registry configured for host");
            return;
        };
        match client.image(reference).await {
            Ok(image) => {
                self.index.replace_image(reference, image);
                tainted.remove(reference);
            }
            Err(e) => {
                if e.taints_retry() {
                    log::warn!("indexing image {reference} failed, will retry: {e}");
                    tainted.insert(reference.clone());
                } else {
                    log::warn!("indexing image {reference} failed: {e}");
                }
            }
        }
    }

    /// Retries every tainted image. An image that now resolves to
    /// `NotFound` is dropped from the retry set rather than retried
    /// forever, since the upstream tag or repository is gone for good.
    async fn sweep_tainted(&self, tainted: &mut HashSet<Reference>) {
        if tainted.is_empty() {
            return;
        }
        log::debug!("retrying {} tainted image(s)", tainted.len());

        let mut still_tainted = HashSet::new();
        for reference in tainted.drain() {
            let Some(client) = self.registries.get(reference.host()) else {
                continue;
            };
            match client.image(&reference).await {
                Ok(image) => self.index.replace_image(&reference, image),
                Err(Error::NotFound(_)) => {
                    log::info!("{reference} no longer exists upstream, dropping from retry set");
                }
                Err(e) => {
                    log::warn!("retry of {reference} failed, will retry again: {e}");
                    still_tainted.insert(reference);
                }
            }
        }
        *tainted = still_tainted;
    }

    fn update_images_total(&self) {
        let total: usize = self.index.read().values().map(|r| r.len()).sum();
        self.metrics.images_total.set(total as f64);
    }
}
