use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use syncflow::config::IntegrationConfig;
use syncflow::sync::{
    Activity, ActivityFetcher, OAuthCredentials, Provider, RefreshedToken, SpreadsheetAccess,
    SpreadsheetInfo, TokenRefresher,
};

use crate::store::SettingsStore;

pub fn http_client(cfg: &IntegrationConfig) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(cfg.http_timeout)
        .user_agent(concat!("syncflow-worker/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

// ----------------------------
// OAuth refresh
// ----------------------------

#[derive(Clone)]
struct OAuthClient {
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    /// Seconds from now.
    expires_in: Option<i64>,
    /// Unix seconds; some providers send this instead of `expires_in`.
    expires_at: Option<i64>,
}

impl TokenResponse {
    fn into_refreshed(self, now: DateTime<Utc>) -> RefreshedToken {
        let expires_at = self
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .or_else(|| {
                self.expires_in
                    .and_then(Duration::try_seconds)
                    .and_then(|ttl| now.checked_add_signed(ttl))
            })
            .unwrap_or_else(|| now + Duration::hours(1));

        RefreshedToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
        }
    }
}

/// Refresh-token grant against each provider; new tokens go back to the store.
pub struct OAuthRefresher {
    http: Client,
    fitness: OAuthClient,
    sheets: OAuthClient,
    store: SettingsStore,
}

impl OAuthRefresher {
    pub fn new(http: Client, cfg: &IntegrationConfig, store: SettingsStore) -> Self {
        Self {
            http,
            fitness: OAuthClient {
                token_url: cfg.fitness_token_url.clone(),
                client_id: cfg.fitness_client_id.clone(),
                client_secret: cfg.fitness_client_secret.clone(),
            },
            sheets: OAuthClient {
                token_url: cfg.sheets_token_url.clone(),
                client_id: cfg.sheets_client_id.clone(),
                client_secret: cfg.sheets_client_secret.clone(),
            },
            store,
        }
    }

    fn client_for(&self, provider: Provider) -> &OAuthClient {
        match provider {
            Provider::FitnessTracker => &self.fitness,
            Provider::Spreadsheet => &self.sheets,
        }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(
        &self,
        provider: Provider,
        refresh_token: &str,
    ) -> anyhow::Result<RefreshedToken> {
        let oauth = self.client_for(provider);
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
        ];

        let res = self
            .http
            .post(&oauth.token_url)
            .form(&params)
            .send()
            .await
            .with_context(|| format!("{provider} token endpoint unreachable"))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            bail!("{provider} token refresh rejected ({status}): {body}");
        }

        let token: TokenResponse = res
            .json()
            .await
            .with_context(|| format!("{provider} token response was not understood"))?;
        Ok(token.into_refreshed(Utc::now()))
    }

    async fn persist_tokens(
        &self,
        user_id: i64,
        provider: Provider,
        credentials: &OAuthCredentials,
    ) -> anyhow::Result<()> {
        self.store.save_tokens(user_id, provider, credentials).await
    }
}

// ----------------------------
// Fitness tracker
// ----------------------------

pub struct FitnessTrackerClient {
    http: Client,
    api_base: String,
    page_size: u32,
}

impl FitnessTrackerClient {
    pub fn new(http: Client, cfg: &IntegrationConfig) -> Self {
        Self {
            http,
            api_base: cfg.fitness_api_base.trim_end_matches('/').to_string(),
            page_size: cfg.activity_page_size.clamp(1, 200),
        }
    }
}

#[async_trait]
impl ActivityFetcher for FitnessTrackerClient {
    async fn fetch_recent_activities(&self, access_token: &str) -> anyhow::Result<Vec<Activity>> {
        let url = format!("{}/athlete/activities", self.api_base);
        let res = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("per_page", self.page_size)])
            .send()
            .await
            .context("fitness tracker unreachable")?;

        let status = res.status();
        if !status.is_success() {
            bail!("fitness tracker returned {status}");
        }

        let activities: Vec<Activity> = res
            .json()
            .await
            .context("fitness tracker activities were not understood")?;
        Ok(activities)
    }
}

// ----------------------------
// Spreadsheet
// ----------------------------

pub struct SpreadsheetClient {
    http: Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpreadsheetMeta {
    spreadsheet_id: String,
    #[serde(default)]
    properties: Option<SpreadsheetProperties>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetProperties {
    title: Option<String>,
}

impl SpreadsheetClient {
    pub fn new(http: Client, cfg: &IntegrationConfig) -> Self {
        Self {
            http,
            api_base: cfg.sheets_api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SpreadsheetAccess for SpreadsheetClient {
    async fn validate_access(
        &self,
        access_token: &str,
        spreadsheet_id: &str,
    ) -> anyhow::Result<SpreadsheetInfo> {
        let url = format!("{}/spreadsheets/{}", self.api_base, spreadsheet_id);
        let res = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("fields", "spreadsheetId,properties.title")])
            .send()
            .await
            .context("spreadsheet service unreachable")?;

        let status = res.status();
        if !status.is_success() {
            bail!("no access to spreadsheet {spreadsheet_id} ({status})");
        }

        let meta: SpreadsheetMeta = res
            .json()
            .await
            .context("spreadsheet metadata was not understood")?;
        Ok(SpreadsheetInfo {
            spreadsheet_id: meta.spreadsheet_id,
            title: meta.properties.and_then(|p| p.title),
        })
    }
}
