pub mod models;
pub mod repo;

use std::time::Duration;

use futures::FutureExt;
use sqlx::ConnectOptions;

/// Builds the process-wide connection pool: TLS mode driven by an optional
/// CA path, a bounded acquire timeout, and an `after_release` health probe
/// that evicts connections left in a bad state by a cancelled query.
pub async fn connect(
    database_url: &url::Url,
    database_ca: Option<&str>,
    pool_max: u32,
    application_name: &str,
) -> anyhow::Result<sqlx::PgPool> {
    let mut options = database_url
        .as_str()
        .parse::<sqlx::postgres::PgConnectOptions>()?
        .application_name(application_name);

    if let Some(ca) = database_ca {
        options = options
            .ssl_mode(sqlx::postgres::PgSslMode::VerifyFull)
            .ssl_root_cert(ca);
    } else {
        options = options.ssl_mode(sqlx::postgres::PgSslMode::Prefer);
    }

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(pool_max)
        .acquire_timeout(Duration::from_secs(5))
        .after_release(|conn, meta| {
            async move {
                let ok = tokio::time::timeout(Duration::from_secs(5), conn.ping())
                    .await
                    .is_ok();
                if !ok {
                    tracing::warn!(?meta, "connection left in a bad state, evicting from pool");
                }
                Ok(ok)
            }
            .boxed()
        })
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Runs the embedded migrations. Safe to call from every binary at startup;
/// `sqlx::migrate!` tracks what's already applied.
pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Periodically logs pool occupancy for operational visibility.
pub fn spawn_pool_stats_logger(pool: sqlx::PgPool) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(120));
        loop {
            interval.tick().await;
            tracing::info!(
                total_connections = pool.size(),
                idle_connections = pool.num_idle(),
                "db connection pool stats"
            );
        }
    });
}
