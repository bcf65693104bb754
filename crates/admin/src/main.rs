//! The admin binary: private lifecycle management for push-channel
//! subscriptions and task-manager webhooks, plus scheduled housekeeping.
//! Unlike ingress and worker it is never reachable from outside the
//! deployment and carries no queue dispatch endpoint of its own.
use std::sync::Arc;

use axum::routing::post;
use axum::Router;
use clap::Parser;
use core::config::CommonArgs;
use core::providers::{CalendarClient, TaskClient};

mod channels;
mod housekeeping;
mod tasks_webhook;

#[derive(Parser, Debug, Clone)]
struct Args {
    #[clap(flatten)]
    common: CommonArgs,

    #[clap(long = "port", env = "PORT", default_value = "8081")]
    port: u16,
}

pub(crate) struct AppState {
    pub(crate) pool: sqlx::PgPool,
    pub(crate) calendar: Arc<dyn CalendarClient>,
    pub(crate) tasks: Arc<dyn TaskClient>,
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
    let secrets = core::bootstrap::build_secrets(&args.common)?;
    let (calendar, tasks) = tokio::try_join!(
        core::bootstrap::build_calendar_client(&secrets),
        core::bootstrap::build_task_client(&secrets),
    )?;

    let state = Arc::new(AppState {
        pool,
        calendar,
        tasks,
        tenant_id: args.common.tenant_id,
    });

    channels::spawn_replacement_scheduler(state.clone());
    housekeeping::spawn_housekeeping_scheduler(state.clone());

    let router = Router::new()
        .route("/admin/calendar/watch/start", post(channels::start))
        .route("/admin/calendar/watch/replace", post(channels::replace))
        .route("/admin/calendar/watch/stop", post(channels::stop))
        .route("/admin/tasks/webhook/create", post(tasks_webhook::create))
        .route("/admin/tasks/webhook/delete", post(tasks_webhook::delete))
        .route("/admin/housekeeping", post(housekeeping::run))
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
