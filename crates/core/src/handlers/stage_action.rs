//! The stage state machine. A single deal-level sequencer — every stage
//! transition funnels through here, guarded by an idempotency key on
//! `(task_gid, section_gid, modified_at)` so redelivery never double-fires
//! the per-stage actions.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::RunStatus;
use crate::db::repo;
use crate::handlers::{self, HandlerCtx};
use crate::markdown::markdown_to_blocks;
use crate::providers::docs::DocBlock;
use crate::providers::tasks::NewTaskFields;
use crate::queue::JobType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub task_gid: String,
    pub section_gid: String,
    pub stage_key: String,
    pub modified_at_iso: DateTime<Utc>,
    pub previous_stage: Option<String>,
}

pub async fn handle(ctx: &HandlerCtx, tenant_id: Uuid, payload: Payload) -> anyhow::Result<()> {
    let idempotency_key = format!(
        "stage:{}:{}:{}",
        payload.task_gid,
        payload.section_gid,
        payload.modified_at_iso.to_rfc3339(),
    );
    if !repo::claim_idempotency_key(&ctx.pool, &idempotency_key, Some(tenant_id)).await? {
        return Ok(());
    }

    let Some(deal) = repo::find_deal_by_task_gid(&ctx.pool, tenant_id, &payload.task_gid).await?
    else {
        return Ok(());
    };

    repo::set_deal_stage(&ctx.pool, deal.id, &payload.stage_key).await?;
    write_status_to_doc_root(ctx, &deal, &payload.stage_key).await;

    let previous_in_diligence = payload.previous_stage.as_deref() == Some("IN_DILIGENCE");
    let new_stage_terminal = payload.stage_key == "PASS" || payload.stage_key == "ARCHIVE";
    if previous_in_diligence || new_stage_terminal {
        repo::request_cancel_running_runs(&ctx.pool, deal.id).await?;
    }

    let run = repo::start_workflow_run(&ctx.pool, tenant_id, deal.id, &payload.stage_key).await?;

    let result = dispatch_stage(ctx, tenant_id, run.id, &deal, &payload).await;

    match &result {
        Ok(()) => {
            repo::finish_workflow_run(&ctx.pool, run.id, RunStatus::Succeeded.as_str(), serde_json::json!({}))
                .await?;
        }
        Err(err) => {
            repo::finish_workflow_run(
                &ctx.pool,
                run.id,
                RunStatus::Failed.as_str(),
                serde_json::json!({ "error": err.to_string() }),
            )
            .await?;
        }
    }

    result
}

async fn dispatch_stage(
    ctx: &HandlerCtx,
    tenant_id: Uuid,
    run_id: Uuid,
    deal: &crate::db::models::Deal,
    payload: &Payload,
) -> anyhow::Result<()> {
    match payload.stage_key.as_str() {
        "FIRST_MEETING" => first_meeting(ctx, &payload.task_gid, deal).await,
        "IN_DILIGENCE" => in_diligence(ctx, tenant_id, run_id, deal).await,
        "IC_REVIEW" => ic_review(ctx, tenant_id, run_id, deal).await,
        "PASS" | "ARCHIVE" => pass_or_archive(ctx, &payload.task_gid, deal, &payload.stage_key).await,
        other => {
            tracing::warn!(stage_key = other, "unrecognized stage key, no per-stage action taken");
            Ok(())
        }
    }
}

const FIRST_MEETING_SUBTASKS: [&str; 4] = [
    "Send intro deck request",
    "Schedule follow-up call",
    "Collect data room access",
    "Log meeting notes in workspace",
];

async fn first_meeting(ctx: &HandlerCtx, task_gid: &str, deal: &crate::db::models::Deal) -> anyhow::Result<()> {
    for name in FIRST_MEETING_SUBTASKS {
        if let Err(err) = ctx.tasks.create_subtask(task_gid, name).await {
            tracing::error!(?err, subtask = name, "failed to create FIRST_MEETING subtask");
        }
    }

    let root_url = deal
        .doc_ids_map()
        .get("root")
        .map(|id| ctx.docs.page_url(id))
        .unwrap_or_default();
    if let Err(err) = ctx
        .tasks
        .update_notes(task_gid, &format!("Document workspace: {root_url}"))
        .await
    {
        tracing::error!(?err, "failed to update task notes with document workspace link");
    }

    Ok(())
}

const IN_DILIGENCE_SUBTASKS: [&str; 5] = [
    "Market & TAM review",
    "Competitive landscape review",
    "Founder background check",
    "Risk assessment",
    "Product defensibility review",
];

async fn in_diligence(
    ctx: &HandlerCtx,
    tenant_id: Uuid,
    run_id: Uuid,
    deal: &crate::db::models::Deal,
) -> anyhow::Result<()> {
    let doc_ids = deal.doc_ids_map();

    let context = if let Some(notes_page) = doc_ids.get("meeting_notes") {
        ctx.docs
            .read_blocks(notes_page)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(block_to_text)
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        String::new()
    };

    if let Some(research_page) = doc_ids.get("research") {
        if let Err(err) = ctx.docs.clear_blocks(research_page).await {
            tracing::error!(?err, "failed to clear research page placeholders");
        }
    }

    handlers::enqueue(
        ctx,
        JobType::ResearchBatch,
        tenant_id,
        crate::handlers::research_batch::Payload {
            run_id,
            deal_id: deal.id,
            company: deal.company.clone().unwrap_or_default(),
            founder: deal.founder.clone(),
            context: if context.is_empty() { None } else { Some(context) },
        },
    )
    .await?;

    for name in IN_DILIGENCE_SUBTASKS {
        if let Some(task_gid) = deal.task_record_gid.as_deref() {
            if let Err(err) = ctx.tasks.create_subtask(task_gid, name).await {
                tracing::error!(?err, subtask = name, "failed to create IN_DILIGENCE subtask");
            }
        }
    }

    Ok(())
}

const IC_REVIEW_SUBTASKS: [&str; 5] = [
    "Confirm financial model",
    "Confirm reference checks",
    "Confirm legal review",
    "Prepare IC memo",
    "Schedule IC meeting",
];

async fn ic_review(
    ctx: &HandlerCtx,
    tenant_id: Uuid,
    run_id: Uuid,
    deal: &crate::db::models::Deal,
) -> anyhow::Result<()> {
    handlers::enqueue(
        ctx,
        JobType::MemoGenerate,
        tenant_id,
        crate::handlers::memo_generate::Payload {
            run_id,
            deal_id: deal.id,
        },
    )
    .await?;

    for name in IC_REVIEW_SUBTASKS {
        if let Some(task_gid) = deal.task_record_gid.as_deref() {
            if let Err(err) = ctx.tasks.create_subtask(task_gid, name).await {
                tracing::error!(?err, subtask = name, "failed to create IC_REVIEW subtask");
            }
        }
    }

    Ok(())
}

async fn pass_or_archive(
    ctx: &HandlerCtx,
    task_gid: &str,
    deal: &crate::db::models::Deal,
    stage_key: &str,
) -> anyhow::Result<()> {
    repo::request_cancel_running_runs(&ctx.pool, deal.id).await?;

    if let Some(root_id) = deal.doc_root_id.as_deref() {
        if let Err(err) = ctx
            .docs
            .append_blocks(
                root_id,
                vec![DocBlock::Callout {
                    text: format!("Deal moved to {stage_key}."),
                }],
            )
            .await
        {
            tracing::error!(?err, "failed to append terminal note to document root");
        }
    }

    if let Err(err) = ctx.tasks.complete_task(task_gid).await {
        tracing::error!(?err, "failed to mark task complete");
    }

    Ok(())
}

async fn write_status_to_doc_root(ctx: &HandlerCtx, deal: &crate::db::models::Deal, stage_key: &str) {
    let Some(root_id) = deal.doc_root_id.as_deref() else {
        return;
    };
    let blocks = markdown_to_blocks(&format!("**Status:** {stage_key}"));
    if let Err(err) = ctx.docs.append_blocks(root_id, blocks).await {
        tracing::error!(?err, "failed to write stage status to document root");
    }
}

fn block_to_text(block: DocBlock) -> Option<String> {
    match block {
        DocBlock::Heading { text, .. }
        | DocBlock::Paragraph { text }
        | DocBlock::BulletItem { text }
        | DocBlock::NumberedItem { text }
        | DocBlock::Quote { text }
        | DocBlock::Callout { text } => Some(text),
        DocBlock::Code { text, .. } => Some(text),
        DocBlock::Divider => None,
    }
}
