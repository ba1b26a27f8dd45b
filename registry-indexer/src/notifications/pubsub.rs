//! Polls one Google Cloud Pub/Sub subscription per configured project for
//! registry change notifications, translating them into engine actions.
//!
//! The Go original uses the streaming `pubsub.Subscription.Receive` API;
//! this workspace has no maintained Pub/Sub client crate to build on, so
//! it polls the REST `subscriptions.pull`/`acknowledge` endpoints directly
//! over `reqwest`, authenticated the same way as [`crate::storage::CloudObjectStorage`].

use indexer_model::{Action, Reference};
use serde::Deserialize;
use tokio::sync::watch;

use crate::engine::EngineHandle;
use crate::registry::Credentials;

const DEFAULT_SUBSCRIPTION_ID: &str = "registryindexer";
const PULL_PAGE_SIZE: u32 = 100;

/// The body of a notification message: `event.Tag` carries the full,
/// registry-qualified reference (not a bare tag), matching what the
/// upstream publisher actually emits.
#[derive(Debug, Deserialize)]
struct PubSubEvent {
    action: String,
    #[serde(default)]
    tag: String,
}

pub struct PubSubListener {
    project_ids: Vec<String>,
    subscription_id: String,
    prefixes: Vec<String>,
    credentials: Credentials,
    client: reqwest::Client,
    engine: EngineHandle,
}

impl PubSubListener {
    pub fn new(
        project_ids: Vec<String>,
        subscription_id: Option<String>,
        prefixes: Vec<String>,
        credentials: Credentials,
        engine: EngineHandle,
    ) -> Self {
        PubSubListener {
            project_ids,
            subscription_id: subscription_id.unwrap_or_else(|| DEFAULT_SUBSCRIPTION_ID.to_string()),
            prefixes,
            credentials,
            client: reqwest::Client::new(),
            engine,
        }
    }

    /// Polls every configured project's subscription until `shutdown`
    /// reports `true`.
    pub async fn serve(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for project_id in &self.project_ids {
                        if let Err(e) = self.poll_once(project_id).await {
                            log::warn!("pubsub poll for project {project_id} failed: {e}");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("pubsub listener received shutdown signal");
                        break;
                    }
                }
            }
        }
    }

    async fn poll_once(&self, project_id: &str) -> Result<(), indexer_model::Error> {
        let (_, token) = self.credentials.basic().await?;
        let pull_url = format!(
            "https://pubsub.googleapis.com/v1/projects/{project_id}/subscriptions/{}:pull",
            self.subscription_id
        );

        let response = self
            .client
            .post(&pull_url)
            .bearer_auth(&token)
            .json(&serde_json::json!({ "maxMessages": PULL_PAGE_SIZE }))
            .send()
            .await
            .map_err(|e| indexer_model::Error::Upstream(format!("pubsub pull failed: {e}")))?;

        if !response.status().is_success() {
            return Err(indexer_model::Error::Upstream(format!(
                "pubsub pull returned {}",
                response.status()
            )));
        }

        let pull: PullResponse = response
            .json()
            .await
            .map_err(|e| indexer_model::Error::Protocol(format!("malformed pubsub pull response: {e}")))?;

        let mut ack_ids = Vec::new();
        for received in pull.received_messages.unwrap_or_default() {
            ack_ids.push(received.ack_id.clone());
            self.handle_message(&received.message).await;
        }

        if !ack_ids.is_empty() {
            self.acknowledge(project_id, &token, ack_ids).await?;
        }

        Ok(())
    }

    async fn handle_message(&self, message: &PubSubMessage) {
        let Some(decoded) = message.decode_data() else {
            log::warn!("pubsub message {}: malformed base64 payload", message.message_id);
            return;
        };
        let event: PubSubEvent = match serde_json::from_slice(&decoded) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("pubsub message {}: invalid event: {e}", message.message_id);
                return;
            }
        };

        if event.tag.is_empty() {
            return;
        }

        let reference = match Reference::parse(&event.tag) {
            Ok(reference) => reference,
            Err(e) => {
                log::warn!("pubsub message {}: {e}", message.message_id);
                return;
            }
        };

        if !self.prefixes.is_empty() && !self.prefixes.iter().any(|p| reference.name().starts_with(p.as_str())) {
            log::debug!(
                "pubsub message {}: {} doesn't match any configured prefix",
                message.message_id,
                reference.name()
            );
            return;
        }

        if reference.tag().is_none() {
            log::debug!("pubsub message {}: ignored because tag is missing", message.message_id);
            return;
        }

        let action = match event.action.as_str() {
            "INSERT" => Action::IndexImage { reference },
            "DELETE" => Action::DeleteImage { reference },
            other => {
                log::debug!("pubsub message {}: unhandled event type {other}", message.message_id);
                return;
            }
        };

        if let Err(e) = self.engine.enqueue(action).await {
            log::warn!("pubsub message {}: failed to enqueue action: {e}", message.message_id);
        }
    }

    async fn acknowledge(
        &self,
        project_id: &str,
        token: &str,
        ack_ids: Vec<String>,
    ) -> Result<(), indexer_model::Error> {
        let ack_url = format!(
            "https://pubsub.googleapis.com/v1/projects/{project_id}/subscriptions/{}:acknowledge",
            self.subscription_id
        );
        let response = self
            .client
            .post(&ack_url)
            .bearer_auth(token)
            .json(&serde_json::json!({ "ackIds": ack_ids }))
            .send()
            .await
            .map_err(|e| indexer_model::Error::Upstream(format!("pubsub acknowledge failed: {e}")))?;
        if !response.status().is_success() {
            return Err(indexer_model::Error::Upstream(format!(
                "pubsub acknowledge returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(rename = "receivedMessages")]
    received_messages: Option<Vec<ReceivedMessage>>,
}

#[derive(Debug, Deserialize)]
struct ReceivedMessage {
    #[serde(rename = "ackId")]
    ack_id: String,
    message: PubSubMessage,
}

#[derive(Debug, Deserialize)]
struct PubSubMessage {
    #[serde(rename = "messageId")]
    message_id: String,
    data: String,
}

impl PubSubMessage {
    fn decode_data(&self) -> Option<Vec<u8>> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.decode(&self.data).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_base64_message_data() {
        let message = PubSubMessage {
            message_id: "1".to_string(),
            data: base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"{}"),
        };
        assert_eq!(message.decode_data().unwrap(), b"{}".to_vec());
    }
}
