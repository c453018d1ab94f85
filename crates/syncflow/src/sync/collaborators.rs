//! Services the sync processors call out to. Implementations live with the
//! binary that wires them; tests use in-memory fakes.

use crate::sync::settings::{OAuthCredentials, ProcessingConfig, Provider, RefreshedToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait ConfigProvider: Send + Sync {
    async fn get_processing_config(&self, user_id: i64) -> anyhow::Result<ProcessingConfig>;

    /// Cheap check used by triggers before enqueueing.
    async fn validate_user_can_be_processed(&self, user_id: i64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, provider: Provider, refresh_token: &str)
        -> anyhow::Result<RefreshedToken>;

    async fn persist_tokens(
        &self,
        user_id: i64,
        provider: Provider,
        credentials: &OAuthCredentials,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ActivityFetcher: Send + Sync {
    async fn fetch_recent_activities(&self, access_token: &str) -> anyhow::Result<Vec<Activity>>;
}

#[async_trait]
pub trait SpreadsheetAccess: Send + Sync {
    /// Succeeds only if the token can read and write `spreadsheet_id`.
    async fn validate_access(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
    ) -> anyhow::Result<SpreadsheetInfo>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sport_type: String,
    pub start_date: DateTime<Utc>,
    /// Meters.
    #[serde(default)]
    pub distance: f64,
    /// Seconds.
    #[serde(default)]
    pub moving_time: i64,
    #[serde(default)]
    pub total_elevation_gain: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadsheetInfo {
    pub spreadsheet_id: String,
    pub title: Option<String>,
}
