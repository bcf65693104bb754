//! Shared fixtures for `tests/`: small helpers that seed the rows a test
//! needs directly over the pool, plus a `FakeQueue` that records enqueued
//! envelopes instead of dispatching them.
use std::sync::Mutex;

use async_trait::async_trait;
use core::queue::{Envelope, Queue};
use uuid::Uuid;

pub async fn seed_tenant(pool: &sqlx::PgPool) -> Uuid {
    sqlx::query_scalar!("INSERT INTO tenants (name) VALUES ($1) RETURNING id", "test-tenant")
        .fetch_one(pool)
        .await
        .expect("seed tenant")
}

pub async fn seed_pipeline_section(
    pool: &sqlx::PgPool,
    tenant_id: Uuid,
    project_gid: &str,
    section_gid: &str,
    stage_key: &str,
) {
    sqlx::query!(
        r#"INSERT INTO pipeline_sections (tenant_id, project_gid, section_gid, stage_key)
           VALUES ($1, $2, $3, $4)"#,
        tenant_id,
        project_gid,
        section_gid,
        stage_key,
    )
    .execute(pool)
    .await
    .expect("seed pipeline section");
}

#[derive(Default)]
pub struct FakeQueue {
    pub enqueued: Mutex<Vec<Envelope>>,
}

impl FakeQueue {
    pub fn envelopes_of(&self, job_type: core::queue::JobType) -> Vec<Envelope> {
        self.enqueued
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job_type == job_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Queue for FakeQueue {
    async fn enqueue(&self, envelope: Envelope) -> anyhow::Result<String> {
        let name = format!("fake-{}", uuid::Uuid::new_v4());
        self.enqueued.lock().unwrap().push(envelope);
        Ok(name)
    }
}
