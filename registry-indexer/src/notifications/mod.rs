//! Event sources that translate external notifications into engine
//! actions: a webhook receiver for registries that push events, and a
//! Pub/Sub poller for registries that publish them to a topic.

mod pubsub;
mod webhook;

pub use pubsub::PubSubListener;
pub use webhook::{configure_webhook_routes, WebhookRegistryHost};
