//! Configuration: a YAML file merged onto built-in defaults field by
//! field (an absent key keeps its default, a present key overrides it),
//! plus the CLI flags that select and override it.

use std::collections::HashSet;

use clap::Parser;
use indexer_model::Error;
use serde::{Deserialize, Serialize};

/// Command-line flags, mirroring the original's `flag`-based parser.
#[derive(Debug, Parser)]
#[command(name = "registry-indexer", about = "Indexes Docker/OCI registries into a searchable catalog")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, env = "REGISTRYINDEXER_CONFIGFILE", default_value = "config.yaml")]
    pub config: String,

    /// Don't reindex on startup, even if configured in the configuration file.
    #[arg(long)]
    pub no_reindex: bool,

    /// Disable the webhook listener, even if configured in the configuration file.
    #[arg(long)]
    pub disable_webhook_listener: bool,

    /// Disable the pub/sub listener, even if configured in the configuration file.
    #[arg(long)]
    pub disable_pubsub_listener: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    pub show_config: bool,

    /// Print the default configuration (before loading the configuration file) and exit.
    #[arg(long)]
    pub show_default_config: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub registries: Vec<RegistryOpts>,
    #[serde(rename = "webhook-listener")]
    pub webhook_listener: WebhookListenerOpts,
    #[serde(rename = "pubsub-listener")]
    pub pubsub_listener: PubSubListenerOpts,
    pub indexer: IndexerOpts,
    pub api: ApiOpts,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            registries: Vec::new(),
            webhook_listener: WebhookListenerOpts::default(),
            pubsub_listener: PubSubListenerOpts::default(),
            indexer: IndexerOpts::default(),
            api: ApiOpts::default(),
        }
    }
}

impl Config {
    /// Loads the YAML file at `path`, merging it onto [`Config::default`].
    pub fn load(path: &str) -> Result<Self, Error> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Config(format!("failed to read configuration file {path}: {e}")))?;
        let config: Config = serde_yaml::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("failed to parse configuration file {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(format!("failed to render configuration: {e}")))
    }

    fn validate(&self) -> Result<(), Error> {
        let mut seen = HashSet::new();
        for registry in &self.registries {
            if !seen.insert(registry.base_url.clone()) {
                return Err(Error::Config(format!("duplicate registry entry: {}", registry.base_url)));
            }
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for Config {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            registries: Vec<RegistryOpts>,
            #[serde(rename = "webhook-listener", default)]
            webhook_listener: WebhookListenerOpts,
            #[serde(rename = "pubsub-listener", default)]
            pubsub_listener: PubSubListenerOpts,
            #[serde(default)]
            indexer: IndexerOpts,
            #[serde(default)]
            api: ApiOpts,
        }

        let raw = Raw::deserialize(deserializer)?;
        Ok(Config {
            registries: raw.registries,
            webhook_listener: raw.webhook_listener,
            pubsub_listener: raw.pubsub_listener,
            indexer: raw.indexer,
            api: raw.api,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryOpts {
    pub base_url: url::Url,
    pub prefixes: Vec<String>,
    pub credentials: Option<RegistryCredentials>,
}

impl<'de> Deserialize<'de> for RegistryOpts {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "base-url")]
            base_url: String,
            #[serde(default)]
            prefixes: Vec<String>,
            #[serde(default)]
            credentials: Option<RawCredentials>,
        }
        #[derive(Deserialize)]
        struct RawCredentials {
            username: String,
            password: String,
        }

        let raw = Raw::deserialize(deserializer)?;
        let base_url: url::Url = normalize_base_url(&raw.base_url).map_err(serde::de::Error::custom)?;

        Ok(RegistryOpts {
            base_url,
            prefixes: raw.prefixes,
            credentials: raw.credentials.map(|c| RegistryCredentials {
                username: c.username,
                password: c.password,
            }),
        })
    }
}

/// Parses a registry base URL, defaulting a bare `host[:port]` (no
/// scheme) to `https://host[:port]`, matching the original's handling of
/// a path-only URL by reinterpreting it as a host.
fn normalize_base_url(raw: &str) -> Result<url::Url, String> {
    if raw.contains("://") {
        return url::Url::parse(raw).map_err(|e| e.to_string());
    }
    url::Url::parse(&format!("https://{raw}")).map_err(|e| e.to_string())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WebhookListenerOpts {
    pub registry: String,
    pub listen: String,
}

impl WebhookListenerOpts {
    pub fn enabled(&self) -> bool {
        !self.listen.is_empty()
    }
}

impl<'de> Deserialize<'de> for WebhookListenerOpts {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            registry: String,
            #[serde(default)]
            listen: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        if raw.listen.is_some() && raw.registry.is_empty() {
            return Err(serde::de::Error::custom("webhook-listener must include registry"));
        }

        Ok(WebhookListenerOpts {
            registry: raw.registry,
            listen: raw.listen.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PubSubListenerOpts {
    pub projects: Vec<String>,
    pub prefixes: Vec<String>,
    pub subscription: String,
}

impl Default for PubSubListenerOpts {
    fn default() -> Self {
        PubSubListenerOpts {
            projects: Vec::new(),
            prefixes: Vec::new(),
            subscription: "registryindexer".to_string(),
        }
    }
}

impl PubSubListenerOpts {
    pub fn enabled(&self) -> bool {
        !self.projects.is_empty()
    }
}

impl<'de> Deserialize<'de> for PubSubListenerOpts {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            projects: Vec<String>,
            #[serde(default)]
            prefixes: Vec<String>,
            #[serde(default)]
            subscription: Option<String>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let default = PubSubListenerOpts::default();
        Ok(PubSubListenerOpts {
            projects: raw.projects,
            prefixes: raw.prefixes,
            subscription: raw.subscription.unwrap_or(default.subscription),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexerOpts {
    #[serde(rename = "queue-length")]
    pub queue_length: u64,
    #[serde(rename = "state-file")]
    pub state_file: String,
    #[serde(rename = "index-on-startup")]
    pub index_on_startup: bool,
}

impl Default for IndexerOpts {
    fn default() -> Self {
        IndexerOpts {
            queue_length: 1024,
            state_file: String::new(),
            index_on_startup: true,
        }
    }
}

impl<'de> Deserialize<'de> for IndexerOpts {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default, rename = "queue-length")]
            queue_length: Option<u64>,
            #[serde(default, rename = "state-file")]
            state_file: Option<String>,
            #[serde(default, rename = "index-on-startup")]
            index_on_startup: Option<bool>,
        }

        let raw = Raw::deserialize(deserializer)?;
        let default = IndexerOpts::default();
        Ok(IndexerOpts {
            queue_length: raw.queue_length.unwrap_or(default.queue_length),
            state_file: raw.state_file.unwrap_or(default.state_file),
            index_on_startup: raw.index_on_startup.unwrap_or(default.index_on_startup),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiOpts {
    pub listen: String,
    #[serde(rename = "cors-allow-all")]
    pub cors_allow_all: bool,
}

impl Default for ApiOpts {
    fn default() -> Self {
        ApiOpts {
            listen: ":5010".to_string(),
            cors_allow_all: false,
        }
    }
}

impl<'de> Deserialize<'de> for ApiOpts {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default, rename = "listen")]
            listen: Option<String>,
            #[serde(default, rename = "cors-allow-all")]
            cors_allow_all: bool,
        }

        let raw = Raw::deserialize(deserializer)?;
        let default = ApiOpts::default();
        Ok(ApiOpts {
            listen: raw.listen.unwrap_or(default.listen),
            cors_allow_all: raw.cors_allow_all,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_indexer_keys_keep_defaults() {
        let config: Config = serde_yaml::from_str("registries: []\nindexer:\n  state-file: /tmp/state.json\n").unwrap();
        assert_eq!(config.indexer.state_file, "/tmp/state.json");
        assert_eq!(config.indexer.queue_length, 1024);
        assert!(config.indexer.index_on_startup);
    }

    #[test]
    fn webhook_listener_requires_registry_when_listen_set() {
        let err = serde_yaml::from_str::<Config>(
            "registries: []\nwebhook-listener:\n  listen: \":8080\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("must include registry"));
    }

    #[test]
    fn registry_base_url_defaults_to_https() {
        let config: Config = serde_yaml::from_str(
            "registries:\n  - base-url: registry.example.com\n",
        )
        .unwrap();
        assert_eq!(config.registries[0].base_url.scheme(), "https");
    }

    #[test]
    fn duplicate_registry_base_url_is_rejected() {
        let bytes = "registries:\n  - base-url: https://registry.example.com\n  - base-url: https://registry.example.com\n";
        let config: Config = serde_yaml::from_str(bytes).unwrap();
        assert!(config.validate().is_err());
    }
}
