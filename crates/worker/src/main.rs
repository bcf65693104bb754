//! The worker binary: a single `/tasks/dispatch` endpoint that routes a
//! queue envelope to its handler.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use core::config::CommonArgs;
use core::handlers::{self, HandlerCtx};
use core::queue::Envelope;

#[derive(Parser, Debug, Clone)]
struct Args {
    #[clap(flatten)]
    common: CommonArgs,

    #[clap(long = "port", env = "PORT", default_value = "8080")]
    port: u16,

    #[clap(long = "pipeline-project-gid", env = "PIPELINE_PROJECT_GID")]
    pipeline_project_gid: String,
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
    let services = core::bootstrap::connect_worker_services(&args.common).await?;

    let ctx = Arc::new(HandlerCtx {
        pool: services.pool,
        queue: services.queue,
        calendar: services.calendar,
        tasks: services.tasks,
        docs: services.docs,
        llm: services.llm,
        llm_model: args.common.llm_model.clone(),
        pipeline_project_gid: args.pipeline_project_gid.clone(),
    });

    let router = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/tasks/dispatch", post(dispatch))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(format!("[::]:{}", args.port)).await?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Parses the envelope by hand rather than via the `Json` extractor:
/// axum's default rejection for a malformed body (including an unrecognized
/// `jobType`) is 422, but an unknown job type is a non-retryable caller
/// error and must come back as 400 so the queue doesn't keep redelivering
/// it.
async fn dispatch(State(ctx): State<Arc<HandlerCtx>>, body: Bytes) -> impl IntoResponse {
    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(?err, "rejecting envelope that failed to deserialize");
            return StatusCode::BAD_REQUEST;
        }
    };

    dispatch_envelope(&ctx, envelope).await
}

#[tracing::instrument(skip(ctx, envelope), fields(job_type = ?envelope.job_type, tenant_id = %envelope.tenant_id))]
async fn dispatch_envelope(ctx: &HandlerCtx, envelope: Envelope) -> StatusCode {
    match handlers::dispatch(ctx, envelope).await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::error!(?err, "job dispatch failed, queue will retry");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
