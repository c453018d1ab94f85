use std::sync::Arc;

use syncflow::api;
use syncflow::config::{Config, IntegrationConfig};
use syncflow::db;
use syncflow::jobs::{ProcessorRegistry, QueueClient, WorkerPool};
use syncflow::sync::ManualSyncProcessor;
use syncflow::telemetry;

mod integrations;
mod store;

use integrations::{http_client, FitnessTrackerClient, OAuthRefresher, SpreadsheetClient};
use store::SettingsStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let cfg = Config::from_env()?;
    let integrations = IntegrationConfig::from_env()?;
    let pool_cfg = cfg.pool_config();

    tracing::info!(
        queue = %cfg.queue,
        workers = pool_cfg.effective_worker_count(),
        poll_interval_secs = cfg.poll_interval.as_secs(),
        dequeue_wait_ms = cfg.dequeue_wait.as_millis() as u64,
        db_max_connections = cfg.db_max_connections,
        admin = cfg.admin_addr.as_deref().unwrap_or("disabled"),
        migrate_on_startup = cfg.migrate_on_startup,
        "syncflow worker starting"
    );

    let queue =
        QueueClient::connect(&cfg.database_url, cfg.db_max_connections, cfg.queue.as_str()).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(queue.pool()).await?;
    }

    let settings = SettingsStore::new(queue.pool().clone());
    let http = http_client(&integrations)?;

    let manual_sync = ManualSyncProcessor::new(
        Arc::new(settings.clone()),
        Arc::new(FitnessTrackerClient::new(http.clone(), &integrations)),
        Arc::new(SpreadsheetClient::new(http.clone(), &integrations)),
    )
    .with_token_refresher(Arc::new(OAuthRefresher::new(
        http,
        &integrations,
        settings.clone(),
    )));
    let registry = ProcessorRegistry::new().with(Arc::new(manual_sync));

    let pool = Arc::new(WorkerPool::new(
        Arc::new(queue.clone()),
        registry,
        pool_cfg,
    ));
    pool.start()?;

    // ---- Admin API task ----
    let api_handle = cfg.admin_addr.clone().map(|addr| {
        let app = api::router(api::ApiState {
            queue: queue.clone(),
            pool: pool.clone(),
            configs: Arc::new(settings),
        });
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "admin api listening");
            axum::serve(listener, app).await?;
            Ok::<(), anyhow::Error>(())
        })
    });

    let api_exit = async {
        match api_handle {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    let result = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("shutdown requested");
            Ok(())
        }
        res = api_exit => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(e.into()),
        },
    };

    pool.stop().await;
    let stats = pool.stats();
    tracing::info!(
        processed = stats.jobs_processed,
        failed = stats.jobs_failed,
        "syncflow worker stopped"
    );
    result
}
