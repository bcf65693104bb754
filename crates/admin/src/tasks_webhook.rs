//! `/admin/tasks/webhook/{create,delete}` registers and deregisters the
//! task-manager's push webhook against a project. The returned
//! `webhook_gid` is merged into the same `(tenant, tasks)` integration row
//! the ingress handshake writes its shared secret into, so the secret
//! survives a later `create` call and vice versa.
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use core::db::{models::IntegrationKind, repo};

use crate::channels::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub project_gid: String,
    pub target_url: String,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub webhook_gid: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRequest>,
) -> Result<Json<CreateResponse>, ApiError> {
    let webhook_gid = state
        .tasks
        .register_webhook(&request.project_gid, &request.target_url)
        .await?;

    let mut config = existing_config(&state).await?;
    config["webhook_gid"] = serde_json::Value::String(webhook_gid.clone());
    repo::upsert_integration(&state.pool, state.tenant_id, IntegrationKind::Tasks.as_str(), config).await?;

    Ok(Json(CreateResponse { webhook_gid }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    #[serde(default)]
    pub webhook_gid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub webhook_gid: String,
    pub status: String,
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let mut config = existing_config(&state).await?;

    let webhook_gid = match request.webhook_gid {
        Some(gid) => gid,
        None => config["webhook_gid"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("no webhook_gid on record for this tenant"))?,
    };

    state.tasks.deregister_webhook(&webhook_gid).await?;

    if let Some(map) = config.as_object_mut() {
        map.remove("webhook_gid");
    }
    repo::upsert_integration(&state.pool, state.tenant_id, IntegrationKind::Tasks.as_str(), config).await?;

    Ok(Json(DeleteResponse {
        webhook_gid,
        status: "deregistered".to_string(),
    }))
}

async fn existing_config(state: &AppState) -> anyhow::Result<serde_json::Value> {
    Ok(
        repo::get_integration(&state.pool, state.tenant_id, IntegrationKind::Tasks.as_str())
            .await?
            .map(|integration| integration.config)
            .unwrap_or_else(|| serde_json::json!({})),
    )
}
