//! The state-change detector. The task provider fires on any task edit;
//! this handler collapses that stream down to actual stage transitions,
//! the only component that reads the stage state machine.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::repo;
use crate::handlers::stage_action;
use crate::handlers::{self, HandlerCtx};
use crate::queue::JobType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub task_gid: String,
    pub project_gid: String,
}

pub async fn handle(ctx: &HandlerCtx, tenant_id: Uuid, payload: Payload) -> anyhow::Result<()> {
    let membership = ctx
        .tasks
        .get_membership(&payload.task_gid, &payload.project_gid)
        .await?;

    let previous_section_gid = repo::upsert_task_state_returning_previous(
        &ctx.pool,
        tenant_id,
        &payload.task_gid,
        &payload.project_gid,
        &membership.section_gid,
        membership.modified_at,
    )
    .await?;

    let Some(previous_section_gid) = previous_section_gid else {
        return Ok(()); // first observation
    };
    if previous_section_gid == membership.section_gid {
        return Ok(()); // no movement
    }

    let Some(stage_key) = repo::resolve_stage_key(
        &ctx.pool,
        tenant_id,
        &payload.project_gid,
        &membership.section_gid,
    )
    .await?
    else {
        return Ok(()); // section not mapped to a stage
    };

    let previous_stage = repo::resolve_stage_key(
        &ctx.pool,
        tenant_id,
        &payload.project_gid,
        &previous_section_gid,
    )
    .await?;

    handlers::enqueue(
        ctx,
        JobType::StageAction,
        tenant_id,
        stage_action::Payload {
            task_gid: payload.task_gid.clone(),
            section_gid: membership.section_gid,
            stage_key: stage_key.clone(),
            modified_at_iso: membership.modified_at,
            previous_stage,
        },
    )
    .await?;

    repo::set_task_state_triggered_stage(
        &ctx.pool,
        tenant_id,
        &payload.task_gid,
        &payload.project_gid,
        &stage_key,
    )
    .await?;

    Ok(())
}
