//! Repository functions: one async fn per statement, each taking either a
//! `&sqlx::PgPool` or an open `&mut sqlx::PgConnection`/`Transaction` so
//! callers can compose multiple writes atomically. Free functions over
//! `sqlx::query_as!` rather than a repository trait/struct.
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use uuid::Uuid;

use super::models::{Deal, Integration, PushChannel, Tenant, WorkflowRun};

pub async fn default_tenant<'e>(db: impl PgExecutor<'e>, name: &str) -> sqlx::Result<Tenant> {
    sqlx::query_as!(
        Tenant,
        r#"
        INSERT INTO tenants (name) VALUES ($1)
        ON CONFLICT DO NOTHING
        RETURNING id, name, created_at
        "#,
        name,
    )
    .fetch_optional(db)
    .await?
    .map(Ok)
    .unwrap_or_else(|| {
        // Conflict target is implicit (no unique constraint on `name`), so in
        // practice the caller is expected to look the tenant up by id; this
        // branch only exists so first-run seeding is idempotent in tests.
        Err(sqlx::Error::RowNotFound)
    })
}

pub async fn get_tenant<'e>(db: impl PgExecutor<'e>, tenant_id: Uuid) -> sqlx::Result<Tenant> {
    sqlx::query_as!(
        Tenant,
        r#"SELECT id, name, created_at FROM tenants WHERE id = $1"#,
        tenant_id,
    )
    .fetch_one(db)
    .await
}

// --- integrations -----------------------------------------------------

pub async fn upsert_integration<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    kind: &str,
    config: serde_json::Value,
) -> sqlx::Result<Integration> {
    sqlx::query_as!(
        Integration,
        r#"
        INSERT INTO integrations (tenant_id, kind, config)
        VALUES ($1, $2, $3)
        ON CONFLICT (tenant_id, kind) DO UPDATE
            SET config = EXCLUDED.config, updated_at = now()
        RETURNING id, tenant_id, kind, config, created_at, updated_at
        "#,
        tenant_id,
        kind,
        config,
    )
    .fetch_one(db)
    .await
}

pub async fn get_integration<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    kind: &str,
) -> sqlx::Result<Option<Integration>> {
    sqlx::query_as!(
        Integration,
        r#"SELECT id, tenant_id, kind, config, created_at, updated_at
           FROM integrations WHERE tenant_id = $1 AND kind = $2"#,
        tenant_id,
        kind,
    )
    .fetch_optional(db)
    .await
}

// --- idempotency --------------------------------------------------------

/// Claims `key`, returning `true` if this call performed the claim (i.e. the
/// key had not previously been admitted) and `false` if it was a duplicate.
pub async fn claim_idempotency_key<'e>(
    db: impl PgExecutor<'e>,
    key: &str,
    tenant_id: Option<Uuid>,
) -> sqlx::Result<bool> {
    let claimed = sqlx::query_scalar!(
        r#"
        INSERT INTO idempotency_keys (key, tenant_id)
        VALUES ($1, $2)
        ON CONFLICT (key) DO NOTHING
        RETURNING key
        "#,
        key,
        tenant_id,
    )
    .fetch_optional(db)
    .await?;

    Ok(claimed.is_some())
}

pub async fn delete_idempotency_keys_older_than<'e>(
    db: impl PgExecutor<'e>,
    older_than: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query!(
        "DELETE FROM idempotency_keys WHERE created_at < $1",
        older_than,
    )
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

// --- push channels --------------------------------------------------------

pub async fn insert_push_channel<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    calendar_id: &str,
    channel_id: &str,
    resource_id: &str,
    channel_token: Option<&str>,
    sync_token: Option<&str>,
    expiration_ms: i64,
) -> sqlx::Result<PushChannel> {
    sqlx::query_as!(
        PushChannel,
        r#"
        INSERT INTO push_channels
            (tenant_id, calendar_id, channel_id, resource_id, channel_token, sync_token, expiration_ms, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'active')
        RETURNING id, tenant_id, calendar_id, channel_id, resource_id, channel_token,
                  status, sync_token, expiration_ms, created_at, updated_at
        "#,
        tenant_id,
        calendar_id,
        channel_id,
        resource_id,
        channel_token,
        sync_token,
        expiration_ms,
    )
    .fetch_one(db)
    .await
}

/// Looks up a channel in `active` or `replaced` state by its provider
/// `channel_id`: a ping may arrive for a channel that was already replaced
/// but not yet stopped.
pub async fn find_channel_by_channel_id<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    channel_id: &str,
) -> sqlx::Result<Option<PushChannel>> {
    sqlx::query_as!(
        PushChannel,
        r#"
        SELECT id, tenant_id, calendar_id, channel_id, resource_id, channel_token,
               status, sync_token, expiration_ms, created_at, updated_at
        FROM push_channels
        WHERE tenant_id = $1 AND channel_id = $2 AND status IN ('active', 'replaced')
        "#,
        tenant_id,
        channel_id,
    )
    .fetch_optional(db)
    .await
}

pub async fn find_active_channel_for_calendar<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    calendar_id: &str,
) -> sqlx::Result<Option<PushChannel>> {
    sqlx::query_as!(
        PushChannel,
        r#"
        SELECT id, tenant_id, calendar_id, channel_id, resource_id, channel_token,
               status, sync_token, expiration_ms, created_at, updated_at
        FROM push_channels
        WHERE tenant_id = $1 AND calendar_id = $2 AND status = 'active'
        "#,
        tenant_id,
        calendar_id,
    )
    .fetch_optional(db)
    .await
}

pub async fn mark_channel_replaced<'e>(
    db: impl PgExecutor<'e>,
    channel_pk: Uuid,
) -> sqlx::Result<()> {
    sqlx::query!(
        "UPDATE push_channels SET status = 'replaced', updated_at = now() WHERE id = $1",
        channel_pk,
    )
    .execute(db)
    .await?;
    Ok(())
}

/// Retires `old_channel_pk` and inserts the replacement's `active` row in
/// one transaction, so `push_channels_one_active` never sees both rows
/// active at once: the UPDATE's effect is visible to the INSERT's own
/// partial-index check within the same transaction.
pub async fn replace_push_channel(
    pool: &sqlx::PgPool,
    old_channel_pk: Uuid,
    tenant_id: Uuid,
    calendar_id: &str,
    channel_id: &str,
    resource_id: &str,
    channel_token: Option<&str>,
    sync_token: Option<&str>,
    expiration_ms: i64,
) -> sqlx::Result<PushChannel> {
    let mut txn = pool.begin().await?;

    sqlx::query!(
        "UPDATE push_channels SET status = 'replaced', updated_at = now() WHERE id = $1",
        old_channel_pk,
    )
    .execute(&mut *txn)
    .await?;

    let new_channel = sqlx::query_as!(
        PushChannel,
        r#"
        INSERT INTO push_channels
            (tenant_id, calendar_id, channel_id, resource_id, channel_token, sync_token, expiration_ms, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7, 'active')
        RETURNING id, tenant_id, calendar_id, channel_id, resource_id, channel_token,
                  status, sync_token, expiration_ms, created_at, updated_at
        "#,
        tenant_id,
        calendar_id,
        channel_id,
        resource_id,
        channel_token,
        sync_token,
        expiration_ms,
    )
    .fetch_one(&mut *txn)
    .await?;

    txn.commit().await?;
    Ok(new_channel)
}

pub async fn mark_channel_stopped<'e>(
    db: impl PgExecutor<'e>,
    channel_pk: Uuid,
) -> sqlx::Result<()> {
    sqlx::query!(
        "UPDATE push_channels SET status = 'stopped', updated_at = now() WHERE id = $1",
        channel_pk,
    )
    .execute(db)
    .await?;
    Ok(())
}

/// Last-writer-wins: whichever calendar-sync invocation finishes last owns
/// the persisted cursor.
pub async fn set_channel_sync_token<'e>(
    db: impl PgExecutor<'e>,
    channel_pk: Uuid,
    sync_token: &str,
) -> sqlx::Result<()> {
    sqlx::query!(
        "UPDATE push_channels SET sync_token = $2, updated_at = now() WHERE id = $1",
        channel_pk,
        sync_token,
    )
    .execute(db)
    .await?;
    Ok(())
}

pub async fn delete_retired_channels_older_than<'e>(
    db: impl PgExecutor<'e>,
    older_than: DateTime<Utc>,
) -> sqlx::Result<u64> {
    let result = sqlx::query!(
        "DELETE FROM push_channels WHERE status IN ('replaced', 'stopped') AND updated_at < $1",
        older_than,
    )
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

// --- deals --------------------------------------------------------------

/// Upserts a deal keyed on `(tenant_id, calendar_id, event_id)`, coalescing
/// non-null incoming fields onto the existing row.
pub async fn upsert_deal<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    calendar_id: &str,
    event_id: &str,
    company: Option<&str>,
    founder: Option<&str>,
) -> sqlx::Result<Deal> {
    sqlx::query_as!(
        Deal,
        r#"
        INSERT INTO deals (tenant_id, calendar_id, event_id, company, founder)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (tenant_id, calendar_id, event_id) DO UPDATE
            SET company = COALESCE(EXCLUDED.company, deals.company),
                founder = COALESCE(EXCLUDED.founder, deals.founder),
                updated_at = now()
        RETURNING id, tenant_id, calendar_id, event_id, company, founder, task_record_gid,
                  doc_root_id, doc_ids, current_stage, created_at, updated_at
        "#,
        tenant_id,
        calendar_id,
        event_id,
        company,
        founder,
    )
    .fetch_one(db)
    .await
}

pub async fn get_deal<'e>(db: impl PgExecutor<'e>, deal_id: Uuid) -> sqlx::Result<Deal> {
    sqlx::query_as!(
        Deal,
        r#"SELECT id, tenant_id, calendar_id, event_id, company, founder, task_record_gid,
                  doc_root_id, doc_ids, current_stage, created_at, updated_at
           FROM deals WHERE id = $1"#,
        deal_id,
    )
    .fetch_one(db)
    .await
}

pub async fn find_deal_by_task_gid<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    task_gid: &str,
) -> sqlx::Result<Option<Deal>> {
    sqlx::query_as!(
        Deal,
        r#"SELECT id, tenant_id, calendar_id, event_id, company, founder, task_record_gid,
                  doc_root_id, doc_ids, current_stage, created_at, updated_at
           FROM deals WHERE tenant_id = $1 AND task_record_gid = $2"#,
        tenant_id,
        task_gid,
    )
    .fetch_optional(db)
    .await
}

pub async fn set_deal_task_record<'e>(
    db: impl PgExecutor<'e>,
    deal_id: Uuid,
    task_record_gid: &str,
) -> sqlx::Result<()> {
    sqlx::query!(
        "UPDATE deals SET task_record_gid = $2, updated_at = now() WHERE id = $1",
        deal_id,
        task_record_gid,
    )
    .execute(db)
    .await?;
    Ok(())
}

pub async fn set_deal_doc_workspace<'e>(
    db: impl PgExecutor<'e>,
    deal_id: Uuid,
    doc_root_id: &str,
    doc_ids: serde_json::Value,
) -> sqlx::Result<()> {
    sqlx::query!(
        "UPDATE deals SET doc_root_id = $2, doc_ids = $3, updated_at = now() WHERE id = $1",
        deal_id,
        doc_root_id,
        doc_ids,
    )
    .execute(db)
    .await?;
    Ok(())
}

pub async fn set_deal_stage<'e>(
    db: impl PgExecutor<'e>,
    deal_id: Uuid,
    stage_key: &str,
) -> sqlx::Result<()> {
    sqlx::query!(
        "UPDATE deals SET current_stage = $2, updated_at = now() WHERE id = $1",
        deal_id,
        stage_key,
    )
    .execute(db)
    .await?;
    Ok(())
}

// --- task states ----------------------------------------------------------

/// Upserts the observed `(section_gid, modified_at)` for a task and returns
/// the *previous* `last_seen_section_gid` in the same round trip. The `FOR
/// UPDATE`-locked CTE snapshots the prior row before the upsert applies,
/// giving a single-statement compare-and-set with no race between the read
/// and the write.
pub async fn upsert_task_state_returning_previous<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    task_gid: &str,
    project_gid: &str,
    section_gid: &str,
    modified_at: DateTime<Utc>,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar!(
        r#"
        WITH existing AS (
            SELECT last_seen_section_gid
            FROM task_states
            WHERE tenant_id = $1 AND task_gid = $2 AND project_gid = $3
            FOR UPDATE
        )
        INSERT INTO task_states
            (tenant_id, task_gid, project_gid, last_seen_section_gid, last_processed_modified_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (tenant_id, task_gid, project_gid) DO UPDATE
            SET last_seen_section_gid = EXCLUDED.last_seen_section_gid,
                last_processed_modified_at = EXCLUDED.last_processed_modified_at,
                updated_at = now()
        RETURNING (SELECT last_seen_section_gid FROM existing) AS "previous_section_gid"
        "#,
        tenant_id,
        task_gid,
        project_gid,
        section_gid,
        modified_at,
    )
    .fetch_one(db)
    .await
}

pub async fn set_task_state_triggered_stage<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    task_gid: &str,
    project_gid: &str,
    stage_key: &str,
) -> sqlx::Result<()> {
    sqlx::query!(
        r#"
        UPDATE task_states SET last_triggered_stage = $4, updated_at = now()
        WHERE tenant_id = $1 AND task_gid = $2 AND project_gid = $3
        "#,
        tenant_id,
        task_gid,
        project_gid,
        stage_key,
    )
    .execute(db)
    .await?;
    Ok(())
}

// --- pipeline sections -----------------------------------------------------

pub async fn resolve_stage_key<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    project_gid: &str,
    section_gid: &str,
) -> sqlx::Result<Option<String>> {
    sqlx::query_scalar!(
        r#"
        SELECT stage_key FROM pipeline_sections
        WHERE tenant_id = $1 AND project_gid = $2 AND section_gid = $3 AND enabled = true
        "#,
        tenant_id,
        project_gid,
        section_gid,
    )
    .fetch_optional(db)
    .await
}

// --- workflow runs ----------------------------------------------------------

pub async fn start_workflow_run<'e>(
    db: impl PgExecutor<'e>,
    tenant_id: Uuid,
    deal_id: Uuid,
    stage_key: &str,
) -> sqlx::Result<WorkflowRun> {
    sqlx::query_as!(
        WorkflowRun,
        r#"
        INSERT INTO workflow_runs (tenant_id, deal_id, stage_key, status)
        VALUES ($1, $2, $3, 'running')
        RETURNING id, tenant_id, deal_id, stage_key, status, cancel_requested, meta, started_at, finished_at
        "#,
        tenant_id,
        deal_id,
        stage_key,
    )
    .fetch_one(db)
    .await
}

pub async fn get_workflow_run<'e>(db: impl PgExecutor<'e>, run_id: Uuid) -> sqlx::Result<WorkflowRun> {
    sqlx::query_as!(
        WorkflowRun,
        r#"SELECT id, tenant_id, deal_id, stage_key, status, cancel_requested, meta, started_at, finished_at
           FROM workflow_runs WHERE id = $1"#,
        run_id,
    )
    .fetch_one(db)
    .await
}

pub async fn is_cancel_requested<'e>(db: impl PgExecutor<'e>, run_id: Uuid) -> sqlx::Result<bool> {
    sqlx::query_scalar!(
        r#"SELECT cancel_requested FROM workflow_runs WHERE id = $1"#,
        run_id,
    )
    .fetch_one(db)
    .await
}

pub async fn request_cancel_running_runs<'e>(
    db: impl PgExecutor<'e>,
    deal_id: Uuid,
) -> sqlx::Result<u64> {
    let result = sqlx::query!(
        "UPDATE workflow_runs SET cancel_requested = true WHERE deal_id = $1 AND status = 'running'",
        deal_id,
    )
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Closes a run, but only out of `running` — a terminal transition is
/// write-once.
pub async fn finish_workflow_run<'e>(
    db: impl PgExecutor<'e>,
    run_id: Uuid,
    status: &str,
    meta: serde_json::Value,
) -> sqlx::Result<bool> {
    let result = sqlx::query!(
        r#"
        UPDATE workflow_runs
        SET status = $2, meta = $3, finished_at = now()
        WHERE id = $1 AND status = 'running'
        "#,
        run_id,
        status,
        meta,
    )
    .execute(db)
    .await?;
    Ok(result.rows_affected() == 1)
}
