//! The queue is the only mechanism for crossing process boundaries.
//! `Queue` is a two-implementation interface selected at runtime by
//! `LOCAL_DEV`, not at compile time.
mod cloud_tasks;
mod local;

pub use cloud_tasks::CloudTasksQueue;
pub use local::LocalHttpQueue;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fixed set of job types the worker's dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    CalendarSync,
    TasksProcess,
    StageAction,
    ResearchAgent,
    ResearchBatch,
    MemoGenerate,
}

/// On-wire queue envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "jobType")]
    pub job_type: JobType,
    #[serde(rename = "tenantId")]
    pub tenant_id: Uuid,
    pub payload: serde_json::Value,
    #[serde(rename = "idempotencyKey", skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Envelope {
    pub fn new(job_type: JobType, tenant_id: Uuid, payload: impl Serialize) -> anyhow::Result<Self> {
        Ok(Self {
            job_type,
            tenant_id,
            payload: serde_json::to_value(payload)?,
            idempotency_key: None,
        })
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Queue is the interface the core requires of the durable-queue provider:
/// enqueue an envelope, get back an opaque task name for logging/tracing.
/// The provider's own retry/backoff configuration is out of scope here —
/// this crate only needs to know how to hand work off to it.
#[async_trait::async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, envelope: Envelope) -> anyhow::Result<String>;
}

/// Builds the configured `Queue` implementation. `local_dev` true
/// dispatches jobs via direct HTTP to `worker_url` rather than through an
/// OIDC-signed durable queue.
pub fn build(
    local_dev: bool,
    worker_url: url::Url,
    project_id: Option<String>,
    region: Option<String>,
    tasks_invoker_sa_email: Option<String>,
) -> std::sync::Arc<dyn Queue> {
    if local_dev {
        std::sync::Arc::new(LocalHttpQueue::new(worker_url))
    } else {
        std::sync::Arc::new(CloudTasksQueue::new(
            worker_url,
            project_id.expect("PROJECT_ID required outside LOCAL_DEV"),
            region.expect("REGION required outside LOCAL_DEV"),
            tasks_invoker_sa_email.expect("TASKS_INVOKER_SA_EMAIL required outside LOCAL_DEV"),
        ))
    }
}
