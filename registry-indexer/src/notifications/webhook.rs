//! Receives Docker Registry webhook notifications and translates their
//! events into engine actions.

use actix_web::{post, web, HttpResponse};
use indexer_model::{Action, Reference};
use serde::Deserialize;

use crate::engine::EngineHandle;

/// The subset of a `docker/distribution` notification envelope this
/// workspace cares about: one or more events, each naming a repository,
/// an optional tag, and the action taken on it.
#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    action: String,
    target: WebhookTarget,
}

#[derive(Debug, Deserialize)]
struct WebhookTarget {
    repository: String,
    #[serde(default)]
    tag: String,
}

/// The registry host this listener is attached to, used to qualify a
/// webhook event's bare repository path into a full reference.
pub struct WebhookRegistryHost(pub String);

#[post("/event")]
async fn receive_event(
    envelope: web::Json<WebhookEnvelope>,
    host: web::Data<WebhookRegistryHost>,
    engine: web::Data<EngineHandle>,
) -> HttpResponse {
    for event in &envelope.events {
        if event.target.tag.is_empty() {
            log::debug!("[webhook {}] ignoring event with no tag", event.id);
            continue;
        }

        let reference = match Reference::with_host_prefix(
            &host.0,
            &format!("{}:{}", event.target.repository, event.target.tag),
        ) {
            Ok(reference) => reference,
            Err(e) => {
                log::warn!("[webhook {}] invalid reference: {e}", event.id);
                continue;
            }
        };

        let action = match event.action.as_str() {
            "push" => Action::IndexImage { reference },
            "delete" => Action::DeleteImage { reference },
            "pull" => continue,
            other => {
                log::debug!("[webhook {}] unhandled event action: {other}", event.id);
                continue;
            }
        };

        if let Err(e) = engine.enqueue(action).await {
            log::warn!("[webhook {}] failed to enqueue action: {e}", event.id);
        }
    }

    HttpResponse::Ok().finish()
}

pub fn configure_webhook_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(receive_event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn ignores_events_without_a_tag() {
        let envelope: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "events": [{"id": "1", "action": "push", "target": {"repository": "ns/app"}}]
        }))
        .unwrap();
        assert_eq!(envelope.events[0].target.tag, "");
    }
}
