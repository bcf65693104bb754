//! `POST /admin/housekeeping` deletes idempotency keys older than 7 days
//! and retired (`replaced`/`stopped`) push channels older than 24h. Also
//! invoked by a background scheduler alongside watch replacement.
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{Duration, Utc};
use serde::Serialize;

use core::db::repo;

use crate::channels::ApiError;
use crate::AppState;

const IDEMPOTENCY_KEY_TTL_DAYS: i64 = 7;
const RETIRED_CHANNEL_TTL_HOURS: i64 = 24;

#[derive(Debug, Serialize)]
pub struct HousekeepingResponse {
    pub idempotency_keys_deleted: u64,
    pub retired_channels_deleted: u64,
}

pub async fn run(State(state): State<Arc<AppState>>) -> Result<Json<HousekeepingResponse>, ApiError> {
    let now = Utc::now();

    let idempotency_keys_deleted = repo::delete_idempotency_keys_older_than(
        &state.pool,
        now - Duration::days(IDEMPOTENCY_KEY_TTL_DAYS),
    )
    .await?;

    let retired_channels_deleted = repo::delete_retired_channels_older_than(
        &state.pool,
        now - Duration::hours(RETIRED_CHANNEL_TTL_HOURS),
    )
    .await?;

    Ok(Json(HousekeepingResponse {
        idempotency_keys_deleted,
        retired_channels_deleted,
    }))
}

/// Runs housekeeping on an interval alongside channel replacement.
pub fn spawn_housekeeping_scheduler(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(6 * 3600));
        loop {
            interval.tick().await;
            let now = Utc::now();
            match repo::delete_idempotency_keys_older_than(
                &state.pool,
                now - Duration::days(IDEMPOTENCY_KEY_TTL_DAYS),
            )
            .await
            {
                Ok(deleted) => tracing::info!(deleted, "housekeeping swept expired idempotency keys"),
                Err(err) => tracing::error!(?err, "housekeeping failed to sweep idempotency keys"),
            }

            match repo::delete_retired_channels_older_than(
                &state.pool,
                now - Duration::hours(RETIRED_CHANNEL_TTL_HOURS),
            )
            .await
            {
                Ok(deleted) => tracing::info!(deleted, "housekeeping swept retired push channels"),
                Err(err) => tracing::error!(?err, "housekeeping failed to sweep retired channels"),
            }
        }
    });
}
