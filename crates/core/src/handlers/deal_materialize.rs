//! Materializes a freshly detected deal into a document workspace and a
//! pipeline task. Both steps are best-effort and independently logged — a
//! failure creating the document workspace must not prevent the (more
//! user-visible) task from being created.
use uuid::Uuid;

use crate::db::models::StageKey;
use crate::db::repo;
use crate::handlers::HandlerCtx;
use crate::providers::docs::DocBlock;
use crate::providers::tasks::NewTaskFields;

const CHILD_PAGES: [&str; 5] = ["Meeting notes", "Research", "Risks", "Follow-ups", "Memo"];

pub async fn materialize(
    ctx: &HandlerCtx,
    tenant_id: Uuid,
    deal_id: Uuid,
    company: &str,
    founder: Option<&str>,
) {
    let founder_label = founder.unwrap_or("Unknown founder");
    let root_title = format!("{company} — {founder_label}");

    match create_doc_workspace(ctx, &root_title).await {
        Ok((root_id, doc_ids)) => {
            let doc_ids_json = serde_json::to_value(&doc_ids).unwrap_or_default();
            if let Err(err) =
                repo::set_deal_doc_workspace(&ctx.pool, deal_id, &root_id, doc_ids_json).await
            {
                tracing::error!(?err, %deal_id, "failed to persist document workspace on deal");
            }

            if let Err(err) = create_pipeline_task(ctx, tenant_id, deal_id, company, founder, &root_id).await
            {
                tracing::error!(?err, %deal_id, "failed to create pipeline task");
            }
        }
        Err(err) => {
            tracing::error!(?err, %deal_id, "failed to create document workspace, proceeding to task creation anyway");
            if let Err(err) = create_pipeline_task(ctx, tenant_id, deal_id, company, founder, "").await {
                tracing::error!(?err, %deal_id, "failed to create pipeline task");
            }
        }
    }
}

async fn create_doc_workspace(
    ctx: &HandlerCtx,
    root_title: &str,
) -> anyhow::Result<(String, std::collections::BTreeMap<String, String>)> {
    let root_id = ctx
        .docs
        .create_page(None, root_title, vec![DocBlock::Heading {
            level: 1,
            text: root_title.to_string(),
        }])
        .await?;

    // Keyed by page id, not url: every consumer (research_batch,
    // stage_action, memo_generate) addresses these pages through the docs
    // provider's id-based API, not by url.
    let mut doc_ids = std::collections::BTreeMap::new();
    doc_ids.insert("root".to_string(), root_id.clone());

    for title in CHILD_PAGES {
        let page_id = ctx
            .docs
            .create_page(Some(&root_id), title, vec![DocBlock::Heading {
                level: 1,
                text: title.to_string(),
            }])
            .await?;
        doc_ids.insert(slug(title), page_id);
    }

    Ok((root_id, doc_ids))
}

async fn create_pipeline_task(
    ctx: &HandlerCtx,
    tenant_id: Uuid,
    deal_id: Uuid,
    company: &str,
    founder: Option<&str>,
    doc_root_id: &str,
) -> anyhow::Result<()> {
    let first_meeting_section = first_meeting_section_gid(ctx, tenant_id).await?;

    let root_url = ctx.docs.page_url(doc_root_id);

    let notes = format!(
        "Deal: {company}{founder_suffix}\n\nDocument workspace: {root_url}",
        founder_suffix = founder.map(|f| format!(" / {f}")).unwrap_or_default(),
    );

    let task_gid = ctx
        .tasks
        .create_task(
            &ctx.pipeline_project_gid,
            &first_meeting_section,
            NewTaskFields {
                name: company.to_string(),
                notes,
            },
        )
        .await?;

    repo::set_deal_task_record(&ctx.pool, deal_id, &task_gid).await?;
    Ok(())
}

async fn first_meeting_section_gid(ctx: &HandlerCtx, tenant_id: Uuid) -> anyhow::Result<String> {
    sqlx::query_scalar!(
        r#"
        SELECT section_gid FROM pipeline_sections
        WHERE tenant_id = $1 AND project_gid = $2 AND stage_key = $3 AND enabled = true
        LIMIT 1
        "#,
        tenant_id,
        ctx.pipeline_project_gid,
        StageKey::FirstMeeting.as_str(),
    )
    .fetch_optional(&ctx.pool)
    .await?
    .ok_or_else(|| anyhow::anyhow!("no enabled FIRST_MEETING section configured for project"))
}

fn slug(title: &str) -> String {
    title.to_lowercase().replace(' ', "_")
}
