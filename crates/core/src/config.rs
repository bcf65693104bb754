//! Configuration shared by all three binaries, using a `clap::Parser` +
//! `env` pattern. Each binary embeds `CommonArgs` via `#[clap(flatten)]`
//! and adds whatever is specific to it.
use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// URL of the Postgres database.
    #[clap(long = "database-host", env = "DATABASE_HOST", default_value = "127.0.0.1")]
    pub database_host: String,
    #[clap(long = "database-port", env = "DATABASE_PORT", default_value = "5432")]
    pub database_port: u16,
    #[clap(long = "database-name", env = "DATABASE_NAME", default_value = "dealflow")]
    pub database_name: String,
    #[clap(long = "database-user", env = "DATABASE_USER", default_value = "dealflow")]
    pub database_user: String,
    #[clap(long = "database-password", env = "DATABASE_PASSWORD", default_value = "")]
    pub database_password: String,
    #[clap(long = "database-ca", env = "DATABASE_CA")]
    pub database_ca: Option<String>,
    #[clap(long = "database-pool-max", env = "DATABASE_POOL_MAX", default_value = "10")]
    pub database_pool_max: u32,

    /// Default tenant used when a request does not otherwise identify one.
    #[clap(long = "tenant-id", env = "TENANT_ID")]
    pub tenant_id: uuid::Uuid,

    #[clap(long = "project-id", env = "PROJECT_ID")]
    pub project_id: Option<String>,
    #[clap(long = "region", env = "REGION")]
    pub region: Option<String>,
    #[clap(long = "service-name", env = "SERVICE_NAME", default_value = "dealflow")]
    pub service_name: String,

    #[clap(long = "worker-url", env = "WORKER_URL")]
    pub worker_url: url::Url,
    #[clap(long = "ingress-public-base-url", env = "INGRESS_PUBLIC_BASE_URL")]
    pub ingress_public_base_url: Option<url::Url>,
    #[clap(long = "tasks-invoker-sa-email", env = "TASKS_INVOKER_SA_EMAIL")]
    pub tasks_invoker_sa_email: Option<String>,

    #[clap(long = "llm-model", env = "LLM_MODEL", default_value = "gpt-4o")]
    pub llm_model: String,

    /// When set, read secrets from the environment, bypass OIDC
    /// verification, and dispatch queue jobs via direct HTTP to
    /// `WORKER_URL`.
    #[clap(long = "local-dev", env = "LOCAL_DEV")]
    pub local_dev: bool,
}

impl CommonArgs {
    pub fn database_url(&self) -> anyhow::Result<url::Url> {
        let url = format!(
            "postgres://{user}:{password}@{host}:{port}/{name}",
            user = self.database_user,
            password = self.database_password,
            host = self.database_host,
            port = self.database_port,
            name = self.database_name,
        );
        Ok(url::Url::parse(&url)?)
    }

    pub fn install_tracing(&self) {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
        tracing::info!(service = %self.service_name, "started");
    }
}
