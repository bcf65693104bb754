//! The ingress binary: public webhook endpoints for the calendar and
//! task-manager providers. All responses return 200 except the two
//! explicitly documented rejections — the providers must never be given
//! a reason to disable a subscription over a transient storage fault.
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use core::config::CommonArgs;
use core::db::repo;
use core::queue::{Envelope, JobType, Queue};

mod tasks_webhook;

#[derive(Parser, Debug, Clone)]
struct Args {
    #[clap(flatten)]
    common: CommonArgs,

    #[clap(long = "port", env = "PORT", default_value = "8080")]
    port: u16,
}

pub(crate) struct AppState {
    pub(crate) pool: sqlx::PgPool,
    pub(crate) queue: Arc<dyn Queue>,
    pub(crate) tenant_id: uuid::Uuid,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.common.install_tracing();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async_main(args));
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    let pool = core::bootstrap::connect_db(&args.common).await?;
    let queue = core::bootstrap::build_queue(&args.common);

    let state = Arc::new(AppState {
        pool,
        queue,
        tenant_id: args.common.tenant_id,
    });

    let router = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/webhooks/calendar", post(calendar_webhook))
        .route("/webhooks/tasks", post(tasks_webhook::handle))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("[::]:{}", args.port)).await?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[tracing::instrument(skip(state, headers))]
async fn calendar_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if header_str(&headers, "x-goog-resource-state").as_deref() == Some("sync") {
        return StatusCode::OK;
    }

    let channel_id = match header_str(&headers, "x-goog-channel-id") {
        Some(v) => v,
        None => return StatusCode::BAD_REQUEST,
    };
    let resource_id = match header_str(&headers, "x-goog-resource-id") {
        Some(v) => v,
        None => return StatusCode::BAD_REQUEST,
    };
    let message_number = header_str(&headers, "x-goog-message-number").unwrap_or_default();
    let channel_token = header_str(&headers, "x-goog-channel-token");

    match handle_calendar_ping(&state, &channel_id, &resource_id, &message_number, channel_token.as_deref()).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::error!(?err, "calendar webhook failed, acknowledging anyway");
            StatusCode::OK
        }
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_string)
}

async fn handle_calendar_ping(
    state: &AppState,
    channel_id: &str,
    resource_id: &str,
    message_number: &str,
    channel_token: Option<&str>,
) -> anyhow::Result<()> {
    let Some(channel) =
        repo::find_channel_by_channel_id(&state.pool, state.tenant_id, channel_id).await?
    else {
        return Ok(());
    };

    if channel.resource_id != resource_id {
        return Ok(());
    }
    if let Some(token) = channel_token {
        if channel.channel_token.as_deref() != Some(token) {
            return Ok(());
        }
    }

    let idempotency_key = format!("calendar_ping:{channel_id}:{message_number}");
    if !repo::claim_idempotency_key(&state.pool, &idempotency_key, Some(state.tenant_id)).await? {
        return Ok(());
    }

    let envelope = Envelope::new(
        JobType::CalendarSync,
        state.tenant_id,
        serde_json::json!({
            "calendar_id": channel.calendar_id,
            "channel_id": channel_id,
        }),
    )?;
    state.queue.enqueue(envelope).await?;

    Ok(())
}
