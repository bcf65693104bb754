//! Push-channel lifecycle. Replace retires the old row and inserts the new
//! `active` one inside a single transaction (`repo::replace_push_channel`),
//! since `push_channels_one_active` forbids two active rows per
//! `(tenant, calendar_id)` and a bare insert-then-retire sequence would hit
//! that constraint while the old row is still active. Stopping the old
//! channel with the provider happens after commit, best-effort.
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use core::db::repo;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub calendar_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub channel_id: String,
    pub calendar_id: String,
    pub status: String,
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let channel = start_channel(&state, &request.calendar_id).await?;
    Ok(Json(ChannelResponse {
        channel_id: channel.channel_id,
        calendar_id: channel.calendar_id,
        status: channel.status,
    }))
}

async fn start_channel(state: &AppState, calendar_id: &str) -> anyhow::Result<core::db::models::PushChannel> {
    let watch = state.calendar.watch(calendar_id).await?;

    let channel = repo::insert_push_channel(
        &state.pool,
        state.tenant_id,
        calendar_id,
        &watch.channel_id,
        &watch.resource_id,
        None,
        None,
        watch.expiration_ms,
    )
    .await?;

    let sync_token = full_sync_for_token(state, calendar_id).await?;
    if let Some(token) = sync_token {
        repo::set_channel_sync_token(&state.pool, channel.id, &token).await?;
    }

    repo::find_channel_by_channel_id(&state.pool, state.tenant_id, &channel.channel_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("channel disappeared immediately after insert"))
}

/// Runs one full sync purely to obtain an initial `sync_token`; any events
/// returned are discarded (a later real `CALENDAR_SYNC` job will process
/// them once the channel starts receiving pings).
async fn full_sync_for_token(state: &AppState, calendar_id: &str) -> anyhow::Result<Option<String>> {
    let page = state.calendar.list_events(calendar_id, None, None).await?;
    Ok(page.next_sync_token)
}

#[derive(Debug, Deserialize)]
pub struct ReplaceRequest {
    pub calendar_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReplaceResponse {
    pub new_channel_id: String,
    pub old_channel_id: String,
}

pub async fn replace(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReplaceRequest>,
) -> Result<Json<ReplaceResponse>, ApiError> {
    let Some(old) =
        repo::find_active_channel_for_calendar(&state.pool, state.tenant_id, &request.calendar_id).await?
    else {
        return Err(ApiError::NotFound);
    };

    let watch = state.calendar.watch(&request.calendar_id).await?;
    let new_channel = repo::replace_push_channel(
        &state.pool,
        old.id,
        state.tenant_id,
        &request.calendar_id,
        &watch.channel_id,
        &watch.resource_id,
        None,
        old.sync_token.as_deref(),
        watch.expiration_ms,
    )
    .await?;

    if let Err(err) = state.calendar.stop(&old.channel_id, &old.resource_id).await {
        tracing::warn!(?err, old_channel_id = %old.channel_id, "best-effort stop of replaced channel failed");
    }

    Ok(Json(ReplaceResponse {
        new_channel_id: new_channel.channel_id,
        old_channel_id: old.channel_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct StopRequest {
    pub channel_id: String,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub channel_id: String,
    pub status: String,
}

pub async fn stop(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StopRequest>,
) -> Result<Json<StopResponse>, ApiError> {
    let Some(channel) =
        repo::find_channel_by_channel_id(&state.pool, state.tenant_id, &request.channel_id).await?
    else {
        return Err(ApiError::NotFound);
    };

    state.calendar.stop(&channel.channel_id, &channel.resource_id).await?;
    repo::mark_channel_stopped(&state.pool, channel.id).await?;

    Ok(Json(StopResponse {
        channel_id: channel.channel_id,
        status: "stopped".to_string(),
    }))
}

/// Calls replace well before `expiration_ms`: this loop checks hourly and
/// replaces any active channel within 24h of expiry.
pub fn spawn_replacement_scheduler(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            if let Err(err) = sweep_expiring_channels(&state).await {
                tracing::error!(?err, "channel replacement sweep failed");
            }
        }
    });
}

const REPLACE_LEAD_MS: i64 = 24 * 60 * 60 * 1000;

async fn sweep_expiring_channels(state: &AppState) -> anyhow::Result<()> {
    let expiring = sqlx::query!(
        r#"SELECT calendar_id FROM push_channels
           WHERE tenant_id = $1 AND status = 'active'
             AND expiration_ms < (extract(epoch from now()) * 1000 + $2)"#,
        state.tenant_id,
        REPLACE_LEAD_MS,
    )
    .fetch_all(&state.pool)
    .await?;

    for row in expiring {
        if let Some(old) =
            repo::find_active_channel_for_calendar(&state.pool, state.tenant_id, &row.calendar_id).await?
        {
            let watch = match state.calendar.watch(&row.calendar_id).await {
                Ok(watch) => watch,
                Err(err) => {
                    tracing::error!(?err, calendar_id = %row.calendar_id, "failed to create replacement watch");
                    continue;
                }
            };

            let result = repo::replace_push_channel(
                &state.pool,
                old.id,
                state.tenant_id,
                &row.calendar_id,
                &watch.channel_id,
                &watch.resource_id,
                None,
                old.sync_token.as_deref(),
                watch.expiration_ms,
            )
            .await;

            if result.is_ok() {
                if let Err(err) = state.calendar.stop(&old.channel_id, &old.resource_id).await {
                    tracing::warn!(?err, "best-effort stop of replaced channel failed during scheduled sweep");
                }
            }
        }
    }

    Ok(())
}

pub enum ApiError {
    NotFound,
    Internal(anyhow::Error),
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::NotFound => {
                (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "not found" }))).into_response()
            }
            ApiError::Internal(err) => {
                tracing::error!(?err, "admin request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": err.to_string() })),
                )
                    .into_response()
            }
        }
    }
}
