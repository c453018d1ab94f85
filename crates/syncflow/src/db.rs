use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;

/// Session and pool knobs read from `SYNCFLOW_DB_*`.
struct Tuning {
    acquire_timeout: Duration,
    jit: bool,
}

impl Tuning {
    fn from_env() -> Self {
        let acquire_timeout_secs = std::env::var("SYNCFLOW_DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(10)
            .clamp(1, 60);

        let jit = std::env::var("SYNCFLOW_DB_JIT")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        Self {
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
            jit,
        }
    }
}

/// One pool is shared by every worker; Postgres serializes concurrent pops.
pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let tuning = Tuning::from_env();

    let mut connect: PgConnectOptions = database_url.parse()?;
    if !tuning.jit {
        connect = connect.options([("jit", "off")]);
    }

    PgPoolOptions::new()
        .max_connections(max_connections.clamp(1, 64))
        .acquire_timeout(tuning.acquire_timeout)
        .connect_with(connect)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("migrations applied");
    Ok(())
}
