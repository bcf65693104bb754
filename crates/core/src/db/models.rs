//! Row types for every table in migrations/0001_init.sql. Kept as plain
//! structs decoded via `sqlx::query_as!`/`query_as`, the same shape the
//! teacher's `agent-sql` crate uses for its `Row` types.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text")]
pub enum IntegrationKind {
    #[sqlx(rename = "calendar")]
    Calendar,
    #[sqlx(rename = "tasks")]
    Tasks,
    #[sqlx(rename = "docs")]
    Docs,
    #[sqlx(rename = "llm")]
    Llm,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::Calendar => "calendar",
            IntegrationKind::Tasks => "tasks",
            IntegrationKind::Docs => "docs",
            IntegrationKind::Llm => "llm",
        }
    }
}

/// Stage within the pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKey {
    FirstMeeting,
    InDiligence,
    IcReview,
    Pass,
    Archive,
}

impl StageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKey::FirstMeeting => "FIRST_MEETING",
            StageKey::InDiligence => "IN_DILIGENCE",
            StageKey::IcReview => "IC_REVIEW",
            StageKey::Pass => "PASS",
            StageKey::Archive => "ARCHIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "FIRST_MEETING" => Some(StageKey::FirstMeeting),
            "IN_DILIGENCE" => Some(StageKey::InDiligence),
            "IC_REVIEW" => Some(StageKey::IcReview),
            "PASS" => Some(StageKey::Pass),
            "ARCHIVE" => Some(StageKey::Archive),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageKey::Pass | StageKey::Archive)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Integration {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub kind: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PushChannel {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub calendar_id: String,
    pub channel_id: String,
    pub resource_id: String,
    pub channel_token: Option<String>,
    pub status: String,
    pub sync_token: Option<String>,
    pub expiration_ms: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PushChannel {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Deal {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub calendar_id: String,
    pub event_id: String,
    pub company: Option<String>,
    pub founder: Option<String>,
    pub task_record_gid: Option<String>,
    pub doc_root_id: Option<String>,
    pub doc_ids: serde_json::Value,
    pub current_stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deal {
    /// Child page ids keyed by slug (`root`, `meeting_notes`, `research`,
    /// `risks`, `follow-ups`, `memo`), addressable through the docs
    /// provider's id-based API.
    pub fn doc_ids_map(&self) -> BTreeMap<String, String> {
        serde_json::from_value(self.doc_ids.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TaskState {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub task_gid: String,
    pub project_gid: String,
    pub last_seen_section_gid: Option<String>,
    pub last_processed_modified_at: Option<DateTime<Utc>>,
    pub last_triggered_stage: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineSection {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub project_gid: String,
    pub section_gid: String,
    pub stage_key: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub deal_id: Uuid,
    pub stage_key: String,
    pub status: String,
    pub cancel_requested: bool,
    pub meta: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }
}
