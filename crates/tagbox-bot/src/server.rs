//! Webhook endpoint.
//!
//! Telegram POSTs each update as JSON and echoes the registered secret in
//! [`SECRET_HEADER`]. Requests are handled inline; the response is sent
//! once the update has been processed.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;

use crate::bot::BotContext;
use crate::handlers::handle_update;
use crate::telegram::Update;

pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
struct WebhookState {
    context: Arc<BotContext>,
    secret: Option<Arc<str>>,
}

/// Builds the webhook router. Without a `secret` every delivery is refused.
pub fn router(context: Arc<BotContext>, secret: Option<String>, webhook_path: &str) -> Router {
    let state = WebhookState {
        context,
        secret: secret.map(Arc::from),
    };
    Router::new()
        .route(webhook_path, post(receive_update))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serves `router` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("webhook server failed")
}

async fn healthz() -> &'static str {
    "ok"
}

async fn receive_update(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let Some(expected) = state.secret.as_deref() else {
        tracing::error!("webhook delivery refused: no webhook secret configured");
        return (StatusCode::INTERNAL_SERVER_ERROR, "webhook secret not configured");
    };
    let provided = headers
        .get(SECRET_HEADER)
        .map_or(&[][..], |value| value.as_bytes());
    if provided.ct_eq(expected.as_bytes()).unwrap_u8() == 0 {
        tracing::warn!("webhook delivery with wrong secret");
        return (StatusCode::FORBIDDEN, "forbidden");
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            tracing::warn!(error = %err, "malformed update");
            return (StatusCode::BAD_REQUEST, "bad request");
        }
    };
    let update_id = update.update_id;

    match handle_update(&state.context, update).await {
        Ok(outcome) => {
            tracing::debug!(update_id, ?outcome, "update handled");
            (StatusCode::OK, "OK")
        }
        Err(err) => {
            tracing::error!(update_id, error = %format!("{err:#}"), "update handling failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "error")
        }
    }
}
