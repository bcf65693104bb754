//! Handler-level tests against a real Postgres test database
//! (`#[sqlx::test]`) and in-memory provider fakes, exercising calendar-sync
//! idempotence, tasks-process stability, stage-action single-fire
//! behavior, and research-batch's fixed emission order plus its
//! cancellation pre-check.
mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use core::db::repo;
use core::handlers::{calendar_sync, memo_generate, research_batch, stage_action, tasks_process, HandlerCtx};
use core::providers::docs::{DocBlock, DocsClient};
use core::providers::fakes::{fake_event, FakeCalendarClient, FakeDocsClient, FakeLlmClient, FakeTaskClient};
use core::queue::JobType;

use common::{seed_pipeline_section, seed_tenant, FakeQueue};

const PROJECT_GID: &str = "project-1";

fn make_ctx(
    pool: sqlx::PgPool,
    calendar: Arc<FakeCalendarClient>,
    tasks: Arc<FakeTaskClient>,
    docs: Arc<FakeDocsClient>,
    llm: Arc<FakeLlmClient>,
    queue: Arc<FakeQueue>,
) -> HandlerCtx {
    HandlerCtx {
        pool,
        queue,
        calendar,
        tasks,
        docs,
        llm,
        llm_model: "gpt-4o".to_string(),
        pipeline_project_gid: PROJECT_GID.to_string(),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn calendar_sync_is_idempotent_across_replays(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;
    seed_pipeline_section(&pool, tenant_id, PROJECT_GID, "sec-first-meeting", "FIRST_MEETING").await;

    let event = fake_event("evt-1", "Acme — Jane [deal]", "confirmed", vec![]);
    let calendar = Arc::new(FakeCalendarClient::with_events("cal-1", vec![event]));
    let tasks = Arc::new(FakeTaskClient::default());
    let docs = Arc::new(FakeDocsClient::default());
    let llm = Arc::new(FakeLlmClient::default());
    let queue = Arc::new(FakeQueue::default());

    let channel = repo::insert_push_channel(
        &pool, tenant_id, "cal-1", "chan-1", "res-1", None, None, Utc::now().timestamp_millis() + 1_000_000,
    )
    .await
    .expect("insert channel");

    let ctx = make_ctx(pool.clone(), calendar.clone(), tasks.clone(), docs.clone(), llm.clone(), queue.clone());

    let payload = calendar_sync::Payload {
        calendar_id: "cal-1".to_string(),
        channel_id: channel.channel_id.clone(),
    };

    calendar_sync::handle(&ctx, tenant_id, payload.clone()).await.expect("first sync");

    let deals = sqlx::query!("SELECT company, founder, task_record_gid FROM deals WHERE tenant_id = $1", tenant_id)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].company.as_deref(), Some("Acme"));
    assert_eq!(deals[0].founder.as_deref(), Some("Jane"));
    assert!(deals[0].task_record_gid.is_some());
    assert_eq!(tasks.created_tasks.lock().unwrap().len(), 1);
    // Root + 5 child pages.
    assert_eq!(docs.pages.lock().unwrap().len(), 6);

    // Replaying the same event must not create a second deal or a second
    // materialization side effect.
    calendar_sync::handle(&ctx, tenant_id, payload).await.expect("replayed sync");

    let deals = sqlx::query!("SELECT id FROM deals WHERE tenant_id = $1", tenant_id)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(deals.len(), 1);
    assert_eq!(tasks.created_tasks.lock().unwrap().len(), 1);
    assert_eq!(docs.pages.lock().unwrap().len(), 6);
}

#[sqlx::test(migrations = "../../migrations")]
async fn calendar_sync_falls_back_to_full_sync_on_token_gone(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;
    seed_pipeline_section(&pool, tenant_id, PROJECT_GID, "sec-first-meeting", "FIRST_MEETING").await;

    let event = fake_event("evt-2", "Beta — Sam [deal]", "confirmed", vec![]);
    let calendar = Arc::new(FakeCalendarClient::with_events("cal-2", vec![event]));
    *calendar.next_sync_token.lock().unwrap() = Some("fresh-token".to_string());
    calendar.fail_next_incremental_sync();

    let tasks = Arc::new(FakeTaskClient::default());
    let docs = Arc::new(FakeDocsClient::default());
    let llm = Arc::new(FakeLlmClient::default());
    let queue = Arc::new(FakeQueue::default());

    let channel = repo::insert_push_channel(
        &pool,
        tenant_id,
        "cal-2",
        "chan-2",
        "res-2",
        None,
        Some("stale-token"),
        Utc::now().timestamp_millis() + 1_000_000,
    )
    .await
    .expect("insert channel");

    let ctx = make_ctx(pool.clone(), calendar, tasks, docs, llm, queue);

    calendar_sync::handle(
        &ctx,
        tenant_id,
        calendar_sync::Payload {
            calendar_id: "cal-2".to_string(),
            channel_id: channel.channel_id.clone(),
        },
    )
    .await
    .expect("sync with fallback");

    let deals = sqlx::query!("SELECT company FROM deals WHERE tenant_id = $1", tenant_id)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(deals.len(), 1);
    assert_eq!(deals[0].company.as_deref(), Some("Beta"));

    let refreshed = repo::find_active_channel_for_calendar(&pool, tenant_id, "cal-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.sync_token.as_deref(), Some("fresh-token"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn tasks_process_is_stable_when_section_is_unchanged(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;
    seed_pipeline_section(&pool, tenant_id, PROJECT_GID, "sec-diligence", "IN_DILIGENCE").await;

    let modified_at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let tasks = Arc::new(FakeTaskClient::with_membership("task-1", "sec-diligence", modified_at));
    let calendar = Arc::new(FakeCalendarClient::default());
    let docs = Arc::new(FakeDocsClient::default());
    let llm = Arc::new(FakeLlmClient::default());
    let queue = Arc::new(FakeQueue::default());

    let ctx = make_ctx(pool.clone(), calendar, tasks.clone(), docs, llm, queue.clone());

    let payload = tasks_process::Payload {
        task_gid: "task-1".to_string(),
        project_gid: PROJECT_GID.to_string(),
    };

    // First observation: no previous state, so this is a no-op beyond
    // recording the row.
    tasks_process::handle(&ctx, tenant_id, payload.clone()).await.expect("first observation");
    assert!(queue.envelopes_of(JobType::StageAction).is_empty());

    // Second dispatch with the same section must also be a no-op on both
    // DB and queue.
    tasks_process::handle(&ctx, tenant_id, payload).await.expect("repeated dispatch");
    assert!(queue.envelopes_of(JobType::StageAction).is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn tasks_process_enqueues_stage_action_on_section_change(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;
    seed_pipeline_section(&pool, tenant_id, PROJECT_GID, "sec-first-meeting", "FIRST_MEETING").await;
    seed_pipeline_section(&pool, tenant_id, PROJECT_GID, "sec-diligence", "IN_DILIGENCE").await;

    let first_modified = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let second_modified = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

    let tasks = Arc::new(FakeTaskClient::with_membership("task-2", "sec-first-meeting", first_modified));
    let calendar = Arc::new(FakeCalendarClient::default());
    let docs = Arc::new(FakeDocsClient::default());
    let llm = Arc::new(FakeLlmClient::default());
    let queue = Arc::new(FakeQueue::default());

    let ctx = make_ctx(pool.clone(), calendar, tasks.clone(), docs, llm, queue.clone());

    let payload = tasks_process::Payload {
        task_gid: "task-2".to_string(),
        project_gid: PROJECT_GID.to_string(),
    };
    tasks_process::handle(&ctx, tenant_id, payload.clone()).await.expect("first observation");

    tasks.set_membership("task-2", "sec-diligence", second_modified);
    tasks_process::handle(&ctx, tenant_id, payload).await.expect("section changed");

    let enqueued = queue.envelopes_of(JobType::StageAction);
    assert_eq!(enqueued.len(), 1);
    assert_eq!(enqueued[0].payload["stage_key"], "IN_DILIGENCE");
    assert_eq!(enqueued[0].payload["previous_stage"], "FIRST_MEETING");
}

#[sqlx::test(migrations = "../../migrations")]
async fn stage_action_fires_exactly_once_per_modified_at(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;

    let deal = repo::upsert_deal(&pool, tenant_id, "cal-3", "evt-3", Some("Gamma"), Some("Lee"))
        .await
        .unwrap();
    repo::set_deal_task_record(&pool, deal.id, "task-3").await.unwrap();

    let calendar = Arc::new(FakeCalendarClient::default());
    let tasks = Arc::new(FakeTaskClient::default());
    let docs = Arc::new(FakeDocsClient::default());
    let llm = Arc::new(FakeLlmClient::default());
    let queue = Arc::new(FakeQueue::default());

    let ctx = make_ctx(pool.clone(), calendar, tasks.clone(), docs, llm, queue.clone());

    let modified_at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let payload = stage_action::Payload {
        task_gid: "task-3".to_string(),
        section_gid: "sec-first-meeting".to_string(),
        stage_key: "FIRST_MEETING".to_string(),
        modified_at_iso: modified_at,
        previous_stage: None,
    };

    stage_action::handle(&ctx, tenant_id, payload.clone()).await.expect("first delivery");
    let subtasks_after_first = tasks.subtasks.lock().unwrap().len();
    assert_eq!(subtasks_after_first, 4);

    let runs = sqlx::query!("SELECT status FROM workflow_runs WHERE deal_id = $1", deal.id)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "succeeded");

    // Redelivery with the same (task_gid, section_gid, modified_at) must
    // not fire a second time: no new workflow run, no new subtasks.
    stage_action::handle(&ctx, tenant_id, payload).await.expect("redelivery");
    assert_eq!(tasks.subtasks.lock().unwrap().len(), subtasks_after_first);

    let runs = sqlx::query!("SELECT status FROM workflow_runs WHERE deal_id = $1", deal.id)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(runs.len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn stage_action_requests_cancellation_leaving_diligence(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;

    let deal = repo::upsert_deal(&pool, tenant_id, "cal-4", "evt-4", Some("Delta"), Some("Kim"))
        .await
        .unwrap();
    repo::set_deal_task_record(&pool, deal.id, "task-4").await.unwrap();

    let running = repo::start_workflow_run(&pool, tenant_id, deal.id, "IN_DILIGENCE").await.unwrap();
    assert!(!repo::is_cancel_requested(&pool, running.id).await.unwrap());

    let calendar = Arc::new(FakeCalendarClient::default());
    let tasks = Arc::new(FakeTaskClient::default());
    let docs = Arc::new(FakeDocsClient::default());
    let llm = Arc::new(FakeLlmClient::default());
    let queue = Arc::new(FakeQueue::default());

    let ctx = make_ctx(pool.clone(), calendar, tasks, docs, llm, queue.clone());

    stage_action::handle(
        &ctx,
        tenant_id,
        stage_action::Payload {
            task_gid: "task-4".to_string(),
            section_gid: "sec-ic-review".to_string(),
            stage_key: "IC_REVIEW".to_string(),
            modified_at_iso: Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            previous_stage: Some("IN_DILIGENCE".to_string()),
        },
    )
    .await
    .expect("stage action");

    // previous_stage = IN_DILIGENCE means any still-running batch gets
    // cancelled.
    assert!(repo::is_cancel_requested(&pool, running.id).await.unwrap());
    assert_eq!(queue.envelopes_of(JobType::MemoGenerate).len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn research_batch_emits_sections_in_fixed_order_and_skips_failures(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;

    let deal = repo::upsert_deal(&pool, tenant_id, "cal-5", "evt-5", Some("Epsilon"), Some("Noor"))
        .await
        .unwrap();
    let docs = Arc::new(FakeDocsClient::default());
    let research_page = docs.create_page(None, "Research", Vec::new()).await.unwrap();
    repo::set_deal_doc_workspace(
        &pool,
        deal.id,
        "root-page",
        serde_json::json!({ "root": "root-page", "research": research_page }),
    )
    .await
    .unwrap();

    let run = repo::start_workflow_run(&pool, tenant_id, deal.id, "IN_DILIGENCE").await.unwrap();

    let llm = Arc::new(FakeLlmClient::default());
    llm.succeed("market_tam", "Big market.");
    llm.fail("competitors");
    llm.succeed("founder_background", "Solid founder.");
    llm.succeed("risks_redflags", "Few risks.");
    llm.succeed("product_defensibility", "Strong moat.");
    llm.succeed("traction_signals", "Growing traction.");

    let calendar = Arc::new(FakeCalendarClient::default());
    let tasks = Arc::new(FakeTaskClient::default());
    let queue = Arc::new(FakeQueue::default());

    let ctx = make_ctx(pool.clone(), calendar, tasks, docs.clone(), llm, queue);

    research_batch::handle(
        &ctx,
        tenant_id,
        research_batch::Payload {
            run_id: run.id,
            deal_id: deal.id,
            company: "Epsilon".to_string(),
            founder: Some("Noor".to_string()),
            context: None,
        },
    )
    .await
    .expect("research batch");

    let blocks = docs.blocks_of(&research_page);
    let headings: Vec<String> = blocks
        .iter()
        .filter_map(|b| match b {
            DocBlock::Heading { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();

    // "competitors" failed and must be silently skipped; the rest appear
    // in the fixed agent order regardless of completion order.
    assert_eq!(
        headings,
        vec![
            "Market & TAM",
            "Founder Background",
            "Risks & Red Flags",
            "Product Defensibility",
            "Traction Signals",
        ]
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn research_batch_exits_cleanly_when_cancel_already_requested(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;

    let deal = repo::upsert_deal(&pool, tenant_id, "cal-6", "evt-6", Some("Zeta"), None)
        .await
        .unwrap();
    let docs = Arc::new(FakeDocsClient::default());
    let research_page = docs.create_page(None, "Research", Vec::new()).await.unwrap();
    repo::set_deal_doc_workspace(
        &pool,
        deal.id,
        "root-page",
        serde_json::json!({ "research": research_page }),
    )
    .await
    .unwrap();

    let run = repo::start_workflow_run(&pool, tenant_id, deal.id, "IN_DILIGENCE").await.unwrap();
    repo::request_cancel_running_runs(&pool, deal.id).await.unwrap();

    let llm = Arc::new(FakeLlmClient::default());
    let calendar = Arc::new(FakeCalendarClient::default());
    let tasks = Arc::new(FakeTaskClient::default());
    let queue = Arc::new(FakeQueue::default());

    let ctx = make_ctx(pool.clone(), calendar, tasks, docs.clone(), llm.clone(), queue);

    research_batch::handle(
        &ctx,
        tenant_id,
        research_batch::Payload {
            run_id: run.id,
            deal_id: deal.id,
            company: "Zeta".to_string(),
            founder: None,
            context: None,
        },
    )
    .await
    .expect("research batch");

    // No LLM round-trip should have started at all, and nothing is
    // written to the research page.
    assert!(llm.calls.lock().unwrap().is_empty());
    assert!(docs.blocks_of(&research_page).is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn memo_generate_writes_callouts_around_the_synthesized_body(pool: sqlx::PgPool) {
    let tenant_id = seed_tenant(&pool).await;

    let deal = repo::upsert_deal(&pool, tenant_id, "cal-7", "evt-7", Some("Theta"), Some("Omar"))
        .await
        .unwrap();
    let docs = Arc::new(FakeDocsClient::default());
    let memo_page = docs.create_page(None, "Memo", Vec::new()).await.unwrap();
    repo::set_deal_doc_workspace(
        &pool,
        deal.id,
        "root-page",
        serde_json::json!({ "memo": memo_page }),
    )
    .await
    .unwrap();

    let run = repo::start_workflow_run(&pool, tenant_id, deal.id, "IC_REVIEW").await.unwrap();

    // `memo_generate`'s prompt names no fixed agent key, so the fake falls
    // through to its default stub output — sufficient for this test, which
    // only checks the callouts the handler wraps around the body.
    let llm = Arc::new(FakeLlmClient::default());

    let calendar = Arc::new(FakeCalendarClient::default());
    let tasks = Arc::new(FakeTaskClient::default());
    let queue = Arc::new(FakeQueue::default());

    let ctx = make_ctx(pool.clone(), calendar, tasks, docs.clone(), llm, queue);

    memo_generate::handle(
        &ctx,
        tenant_id,
        memo_generate::Payload {
            run_id: run.id,
            deal_id: deal.id,
        },
    )
    .await
    .expect("memo generation");

    let blocks = docs.blocks_of(&memo_page);
    assert!(matches!(blocks.first(), Some(DocBlock::Callout { text }) if text.starts_with("Generated on")));
    assert!(matches!(blocks.last(), Some(DocBlock::Callout { text }) if text.contains("Review before circulating")));
}
