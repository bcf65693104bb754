//! Worker job handlers. The dispatcher treats `JobType` as a closed set of
//! tagged variants matched exhaustively — no dynamic registry, since the
//! system has a fixed number of job kinds known at compile time.
pub mod calendar_sync;
pub mod deal_materialize;
pub mod memo_generate;
pub mod research_batch;
pub mod stage_action;
pub mod tasks_process;

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::providers::{CalendarClient, DocsClient, LlmClient, TaskClient};
use crate::queue::{Envelope, JobType, Queue};

/// Shared dependencies every handler needs. One instance is built at
/// startup and cloned (cheaply, via `Arc`) into the axum router state.
#[derive(Clone)]
pub struct HandlerCtx {
    pub pool: PgPool,
    pub queue: Arc<dyn Queue>,
    pub calendar: Arc<dyn CalendarClient>,
    pub tasks: Arc<dyn TaskClient>,
    pub docs: Arc<dyn DocsClient>,
    pub llm: Arc<dyn LlmClient>,
    pub llm_model: String,
    pub pipeline_project_gid: String,
}

/// Dispatches one queue envelope to its handler. Returns `Ok(())` on
/// success (worker replies 2xx, queue acks) or `Err` on any handler
/// exception (worker replies 5xx, queue retries per its own policy).
pub async fn dispatch(ctx: &HandlerCtx, envelope: Envelope) -> anyhow::Result<()> {
    match envelope.job_type {
        JobType::CalendarSync => {
            let payload: calendar_sync::Payload = serde_json::from_value(envelope.payload)?;
            calendar_sync::handle(ctx, envelope.tenant_id, payload).await
        }
        JobType::TasksProcess => {
            let payload: tasks_process::Payload = serde_json::from_value(envelope.payload)?;
            tasks_process::handle(ctx, envelope.tenant_id, payload).await
        }
        JobType::StageAction => {
            let payload: stage_action::Payload = serde_json::from_value(envelope.payload)?;
            stage_action::handle(ctx, envelope.tenant_id, payload).await
        }
        JobType::ResearchBatch => {
            let payload: research_batch::Payload = serde_json::from_value(envelope.payload)?;
            research_batch::handle(ctx, envelope.tenant_id, payload).await
        }
        JobType::ResearchAgent => {
            let payload: research_batch::SingleAgentPayload =
                serde_json::from_value(envelope.payload)?;
            research_batch::handle_single_agent(ctx, envelope.tenant_id, payload).await
        }
        JobType::MemoGenerate => {
            let payload: memo_generate::Payload = serde_json::from_value(envelope.payload)?;
            memo_generate::handle(ctx, envelope.tenant_id, payload).await
        }
    }
}

/// Small helper used by several handlers to enqueue downstream work.
pub(crate) async fn enqueue(
    ctx: &HandlerCtx,
    job_type: JobType,
    tenant_id: Uuid,
    payload: impl serde::Serialize,
) -> anyhow::Result<()> {
    let envelope = Envelope::new(job_type, tenant_id, payload)?;
    ctx.queue.enqueue(envelope).await?;
    Ok(())
}
