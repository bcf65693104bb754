//! Shared startup wiring used by all three binaries: connects the pool,
//! builds the secret-backed provider clients, and assembles the queue.
//! Each binary calls the pieces it actually needs, the same way the
//! teacher's `agent::main::async_main` assembles one `App`/`PGControlPlane`
//! shared by every route — except here each process only wires the
//! providers its own handlers touch.
use std::sync::Arc;

use crate::config::CommonArgs;
use crate::providers::calendar::HttpCalendarClient;
use crate::providers::docs::HttpDocsClient;
use crate::providers::llm::HttpLlmClient;
use crate::providers::tasks::HttpTaskClient;
use crate::providers::{CalendarClient, DocsClient, LlmClient, TaskClient};
use crate::queue::Queue;
use crate::secrets::{EnvSecretStore, GcpSecretStore, SecretCache, SecretStore};

const CALENDAR_BASE_URL: &str = "CALENDAR_BASE_URL";
const CALENDAR_TOKEN: &str = "CALENDAR_ACCESS_TOKEN";
const TASKS_BASE_URL: &str = "TASKS_BASE_URL";
const TASKS_TOKEN: &str = "TASKS_ACCESS_TOKEN";
const DOCS_BASE_URL: &str = "DOCS_BASE_URL";
const DOCS_WORKSPACE_URL: &str = "DOCS_WORKSPACE_URL";
const DOCS_TOKEN: &str = "DOCS_ACCESS_TOKEN";
const LLM_BASE_URL: &str = "LLM_BASE_URL";
const LLM_TOKEN: &str = "LLM_API_KEY";

/// Connects the process-wide pool and runs embedded migrations. Every
/// binary calls this first.
pub async fn connect_db(args: &CommonArgs) -> anyhow::Result<sqlx::PgPool> {
    let application_name = std::env::var("HOSTNAME").unwrap_or_else(|_| args.service_name.clone());
    let pool = crate::db::connect(
        &args.database_url()?,
        args.database_ca.as_deref(),
        args.database_pool_max,
        &application_name,
    )
    .await?;
    crate::db::migrate(&pool).await?;
    crate::db::spawn_pool_stats_logger(pool.clone());
    Ok(pool)
}

pub fn build_queue(args: &CommonArgs) -> Arc<dyn Queue> {
    crate::queue::build(
        args.local_dev,
        args.worker_url.clone(),
        args.project_id.clone(),
        args.region.clone(),
        args.tasks_invoker_sa_email.clone(),
    )
}

/// The secret store backing provider credential lookups: the environment
/// directly under `LOCAL_DEV`, the project's secret manager otherwise.
pub fn build_secrets(args: &CommonArgs) -> anyhow::Result<SecretCache<Arc<dyn SecretStore>>> {
    let store: Arc<dyn SecretStore> = if args.local_dev {
        Arc::new(EnvSecretStore)
    } else {
        let project_id = args
            .project_id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("PROJECT_ID required outside LOCAL_DEV"))?;
        Arc::new(GcpSecretStore::new(project_id))
    };
    Ok(SecretCache::new(store))
}

pub async fn build_calendar_client(
    secrets: &SecretCache<Arc<dyn SecretStore>>,
) -> anyhow::Result<Arc<dyn CalendarClient>> {
    let base: url::Url = secrets.get(CALENDAR_BASE_URL).await?.parse()?;
    let token = secrets.get(CALENDAR_TOKEN).await?;
    Ok(Arc::new(HttpCalendarClient::new(base, token)))
}

pub async fn build_task_client(
    secrets: &SecretCache<Arc<dyn SecretStore>>,
) -> anyhow::Result<Arc<dyn TaskClient>> {
    let base: url::Url = secrets.get(TASKS_BASE_URL).await?.parse()?;
    let token = secrets.get(TASKS_TOKEN).await?;
    Ok(Arc::new(HttpTaskClient::new(base, token)))
}

pub async fn build_docs_client(
    secrets: &SecretCache<Arc<dyn SecretStore>>,
) -> anyhow::Result<Arc<dyn DocsClient>> {
    let base: url::Url = secrets.get(DOCS_BASE_URL).await?.parse()?;
    let workspace: url::Url = secrets.get(DOCS_WORKSPACE_URL).await?.parse()?;
    let token = secrets.get(DOCS_TOKEN).await?;
    Ok(Arc::new(HttpDocsClient::new(base, token, workspace)))
}

pub async fn build_llm_client(
    secrets: &SecretCache<Arc<dyn SecretStore>>,
) -> anyhow::Result<Arc<dyn LlmClient>> {
    let base: url::Url = secrets.get(LLM_BASE_URL).await?.parse()?;
    let token = secrets.get(LLM_TOKEN).await?;
    Ok(Arc::new(HttpLlmClient::new(base, token)))
}

/// Every provider client the worker's handler dispatch needs.
pub struct WorkerServices {
    pub pool: sqlx::PgPool,
    pub queue: Arc<dyn Queue>,
    pub calendar: Arc<dyn CalendarClient>,
    pub tasks: Arc<dyn TaskClient>,
    pub docs: Arc<dyn DocsClient>,
    pub llm: Arc<dyn LlmClient>,
}

pub async fn connect_worker_services(args: &CommonArgs) -> anyhow::Result<WorkerServices> {
    let pool = connect_db(args).await?;
    let secrets = build_secrets(args)?;
    let (calendar, tasks, docs, llm) = tokio::try_join!(
        build_calendar_client(&secrets),
        build_task_client(&secrets),
        build_docs_client(&secrets),
        build_llm_client(&secrets),
    )?;

    Ok(WorkerServices {
        pool,
        queue: build_queue(args),
        calendar,
        tasks,
        docs,
        llm,
    })
}
