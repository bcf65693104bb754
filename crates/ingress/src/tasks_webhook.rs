//! The task-manager's two-phase webhook registration. A handshake carries
//! a shared secret header once; every subsequent delivery is authenticated
//! by HMAC-SHA256 of the raw body using that same secret.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use core::db::{models::IntegrationKind, repo};
use core::queue::{Envelope, JobType};

use crate::AppState;

const HANDSHAKE_HEADER: &str = "x-hook-secret";
const SIGNATURE_HEADER: &str = "x-hook-signature";

pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = header_str(&headers, HANDSHAKE_HEADER) {
        return handshake(&state, &secret, &headers).await;
    }

    if let Some(signature) = header_str(&headers, SIGNATURE_HEADER) {
        return match event_mode(&state, &signature, &body).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(?err, "tasks webhook event handling failed, acknowledging anyway");
                StatusCode::OK.into_response()
            }
        };
    }

    StatusCode::BAD_REQUEST.into_response()
}

async fn handshake(state: &AppState, secret: &str, request_headers: &HeaderMap) -> Response {
    if let Err(err) = repo::upsert_integration(
        &state.pool,
        state.tenant_id,
        IntegrationKind::Tasks.as_str(),
        serde_json::json!({ "secret": secret }),
    )
    .await
    {
        tracing::error!(?err, "failed to persist task-manager webhook secret");
        return StatusCode::OK.into_response();
    }

    let mut response_headers = HeaderMap::new();
    if let Some(value) = request_headers.get(HANDSHAKE_HEADER) {
        response_headers.insert(HANDSHAKE_HEADER, value.clone());
    }
    (StatusCode::OK, response_headers).into_response()
}

async fn event_mode(state: &AppState, signature: &str, body: &Bytes) -> anyhow::Result<Response> {
    let Some(integration) =
        repo::get_integration(&state.pool, state.tenant_id, IntegrationKind::Tasks.as_str()).await?
    else {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    };

    let secret = integration.config["secret"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("stored task-manager integration is missing its secret"))?;

    if !core::hmac_verify::verify(secret, body, signature) {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    }

    let payload: WebhookBody = serde_json::from_slice(body)?;
    if payload.events.is_empty() {
        return Ok(StatusCode::OK.into_response());
    }

    for event in payload.events {
        if event.resource_type != "task" {
            continue;
        }
        if let Err(err) = process_event(state, &event).await {
            tracing::error!(?err, "failed to process task-manager webhook event");
        }
    }

    Ok(StatusCode::OK.into_response())
}

async fn process_event(state: &AppState, event: &WebhookEvent) -> anyhow::Result<()> {
    let idempotency_key = format!(
        "tasks_evt:{}:{}:{}:{}",
        event.webhook_gid, event.created_at, event.resource_gid, event.action,
    );
    if !repo::claim_idempotency_key(&state.pool, &idempotency_key, Some(state.tenant_id)).await? {
        return Ok(());
    }

    let envelope = Envelope::new(
        JobType::TasksProcess,
        state.tenant_id,
        serde_json::json!({
            "task_gid": event.resource_gid,
            "project_gid": event.parent_gid,
        }),
    )?;
    state.queue.enqueue(envelope).await?;

    Ok(())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

#[derive(Debug, serde::Deserialize)]
struct WebhookBody {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Debug, serde::Deserialize)]
struct WebhookEvent {
    resource_gid: String,
    #[serde(default)]
    resource_type: String,
    #[serde(default)]
    parent_gid: String,
    action: String,
    webhook_gid: String,
    created_at: DateTime<Utc>,
}
