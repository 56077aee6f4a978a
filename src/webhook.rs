//! Webhook receiver: authenticate, enqueue, acknowledge.
//!
//! Telegram retries any non-200 answer, so every request is acknowledged
//! with 200 whatever happens to it.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::store::Store;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressOutcome {
    Queued {
        delivery_id: String,
        update_id: Option<i64>,
    },
    Unauthorized,
    Invalid,
    /// The queue rejected the body.
    Failed,
}

impl IngressOutcome {
    fn body(&self) -> Value {
        match self {
            IngressOutcome::Unauthorized => json!({"ok": false, "error": "Unauthorized"}),
            IngressOutcome::Invalid => json!({"message": "Invalid request"}),
            IngressOutcome::Queued { .. } | IngressOutcome::Failed => {
                json!({"message": "Webhook received"})
            }
        }
    }
}

#[derive(Clone)]
pub struct WebhookState {
    store: Store,
    secret: String,
}

impl WebhookState {
    pub fn new(store: Store, secret: String) -> Self {
        Self { store, secret }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.secret.is_empty() {
            return true;
        }
        headers
            .get(SECRET_HEADER)
            .map(|value| constant_time_eq(value.as_bytes(), self.secret.as_bytes()))
            .unwrap_or(false)
    }

    pub async fn ingest(&self, headers: &HeaderMap, body: &[u8]) -> IngressOutcome {
        if !self.authorized(headers) {
            warn!("Rejected webhook call with missing or wrong secret token");
            return IngressOutcome::Unauthorized;
        }

        let update = match serde_json::from_slice::<serde_json::Map<String, Value>>(body) {
            Ok(update) => update,
            Err(e) => {
                error!("Failed to parse webhook body: {}", e);
                return IngressOutcome::Invalid;
            }
        };
        let update_id = update.get("update_id").and_then(Value::as_i64);

        match self.store.enqueue(body, chrono::Utc::now().timestamp()).await {
            Ok(delivery_id) => {
                info!("Successfully queued update_id: {:?}", update_id);
                IngressOutcome::Queued {
                    delivery_id,
                    update_id,
                }
            }
            Err(e) => {
                error!("Failed to enqueue update {:?}: {:#}", update_id, e);
                IngressOutcome::Failed
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn router(state: WebhookState, webhook_path: &str) -> Router {
    Router::new()
        .route(webhook_path, post(receive))
        .route("/health", get(health))
        .with_state(state)
}

async fn receive(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let outcome = state.ingest(&headers, &body).await;
    if let IngressOutcome::Queued {
        delivery_id,
        update_id,
    } = &outcome
    {
        debug!("Update {:?} stored as delivery {}", update_id, delivery_id);
    }
    (StatusCode::OK, Json(outcome.body()))
}

async fn health() -> &'static str {
    "ok"
}
