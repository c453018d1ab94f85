use crate::jobs::pool::{PoolConfig, DEFAULT_WORKER_COUNT};
use crate::jobs::queue::DEFAULT_QUEUE_NAME;
use std::time::Duration;

// Config is a central place for runtime configuration.
// Every key is read as SYNCFLOW_<KEY> first, then <KEY>.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub queue: String,
    pub worker_count: usize,
    pub poll_interval: Duration,
    pub dequeue_wait: Duration,
    pub admin_addr: Option<String>,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env_or_fallback("SYNCFLOW_DATABASE_URL", "DATABASE_URL")
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_count = env_parse("WORKER_COUNT").unwrap_or(DEFAULT_WORKER_COUNT);

        let queue = env_or_fallback("SYNCFLOW_QUEUE_NAME", "QUEUE_NAME")
            .unwrap_or_else(|| DEFAULT_QUEUE_NAME.to_string());

        let poll_interval = Duration::from_secs(env_parse("POLL_INTERVAL_SECS").unwrap_or(5));
        let dequeue_wait = Duration::from_millis(env_parse("DEQUEUE_WAIT_MS").unwrap_or(1000));

        // every worker shares the pool; leave headroom for the admin API
        let db_max_connections = env_parse("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|| (worker_count as u32).saturating_add(2));

        let admin_addr = env_or_fallback("SYNCFLOW_ADMIN_ADDR", "ADMIN_ADDR")
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("SYNCFLOW_MIGRATE_ON_STARTUP")
            .or_else(|| env_bool("MIGRATE_ON_STARTUP"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            db_max_connections,
            queue,
            worker_count,
            poll_interval,
            dequeue_wait,
            admin_addr,
            migrate_on_startup,
        })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            dequeue_wait: self.dequeue_wait,
            poll_interval: self.poll_interval,
        }
    }
}

/// Endpoints and OAuth clients for the two external providers.
#[derive(Clone, Debug)]
pub struct IntegrationConfig {
    pub fitness_api_base: String,
    pub fitness_token_url: String,
    pub fitness_client_id: String,
    pub fitness_client_secret: String,
    pub activity_page_size: u32,

    pub sheets_api_base: String,
    pub sheets_token_url: String,
    pub sheets_client_id: String,
    pub sheets_client_secret: String,

    pub http_timeout: Duration,
}

impl IntegrationConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            fitness_api_base: env_key("FITNESS_API_BASE")
                .unwrap_or_else(|| "https://www.strava.com/api/v3".to_string()),
            fitness_token_url: env_key("FITNESS_TOKEN_URL")
                .unwrap_or_else(|| "https://www.strava.com/oauth/token".to_string()),
            fitness_client_id: required("FITNESS_CLIENT_ID")?,
            fitness_client_secret: required("FITNESS_CLIENT_SECRET")?,
            activity_page_size: env_parse("ACTIVITY_PAGE_SIZE").unwrap_or(30),

            sheets_api_base: env_key("SHEETS_API_BASE")
                .unwrap_or_else(|| "https://sheets.googleapis.com/v4".to_string()),
            sheets_token_url: env_key("SHEETS_TOKEN_URL")
                .unwrap_or_else(|| "https://oauth2.googleapis.com/token".to_string()),
            sheets_client_id: required("SHEETS_CLIENT_ID")?,
            sheets_client_secret: required("SHEETS_CLIENT_SECRET")?,

            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS").unwrap_or(15)),
        })
    }
}

fn env_key(key: &str) -> Option<String> {
    env_or_fallback(&format!("SYNCFLOW_{key}"), key)
}

fn required(key: &str) -> anyhow::Result<String> {
    env_key(key).ok_or_else(|| anyhow::anyhow!("{key} is missing"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_key(key).and_then(|s| s.trim().parse().ok())
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
