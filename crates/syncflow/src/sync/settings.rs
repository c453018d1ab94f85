use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tokens expiring within this window count as stale.
pub const TOKEN_EXPIRY_BUFFER_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    FitnessTracker,
    Spreadsheet,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::FitnessTracker, Provider::Spreadsheet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::FitnessTracker => "fitness_tracker",
            Provider::Spreadsheet => "spreadsheet",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider-side account id.
    pub subject_id: Option<String>,
}

// Keeps tokens out of logs.
impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("subject_id", &self.subject_id)
            .finish()
    }
}

/// Result of a refresh-token grant.
#[derive(Clone, PartialEq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Providers that don't rotate refresh tokens return `None`.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl OAuthCredentials {
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Present and expiring more than [`TOKEN_EXPIRY_BUFFER_SECS`] after `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (self.access_token(), self.expires_at) {
            (Some(_), Some(expires_at)) => {
                expires_at > now + Duration::seconds(TOKEN_EXPIRY_BUFFER_SECS)
            }
            _ => false,
        }
    }

    /// Not valid, but a refresh token is on hand.
    pub fn is_refreshable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid_at(now) && self.refresh_token().is_some()
    }

    pub fn apply_refresh(&mut self, refreshed: RefreshedToken) {
        self.access_token = Some(refreshed.access_token);
        if let Some(rt) = refreshed.refresh_token {
            self.refresh_token = Some(rt);
        }
        self.expires_at = Some(refreshed.expires_at);
    }
}

/// Snapshot of one user's settings, built fresh for every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub user_id: i64,
    pub email: String,
    pub fitness: OAuthCredentials,
    pub spreadsheet: OAuthCredentials,
    pub spreadsheet_id: Option<String>,
    pub timezone: String,
    pub automation_enabled: bool,
    pub email_notifications_enabled: bool,
}

impl ProcessingConfig {
    pub fn credentials(&self, provider: Provider) -> &OAuthCredentials {
        match provider {
            Provider::FitnessTracker => &self.fitness,
            Provider::Spreadsheet => &self.spreadsheet,
        }
    }

    pub fn credentials_mut(&mut self, provider: Provider) -> &mut OAuthCredentials {
        match provider {
            Provider::FitnessTracker => &mut self.fitness,
            Provider::Spreadsheet => &mut self.spreadsheet,
        }
    }

    pub fn spreadsheet_id(&self) -> Option<&str> {
        self.spreadsheet_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Providers that currently hold a usable access token.
    pub fn valid_providers_at(&self, now: DateTime<Utc>) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.credentials(*p).is_valid_at(now))
            .collect()
    }
}
