use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use syncflow::sync::{ConfigProvider, OAuthCredentials, ProcessingConfig, Provider};

/// Per-user sync settings backed by `user_sync_settings`.
#[derive(Clone)]
pub struct SettingsStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct SettingsRow {
    user_id: i64,
    email: String,
    spreadsheet_id: Option<String>,
    timezone: String,
    automation_enabled: bool,
    email_notifications_enabled: bool,

    fitness_access_token: Option<String>,
    fitness_refresh_token: Option<String>,
    fitness_token_expires_at: Option<DateTime<Utc>>,
    fitness_subject_id: Option<String>,

    sheets_access_token: Option<String>,
    sheets_refresh_token: Option<String>,
    sheets_token_expires_at: Option<DateTime<Utc>>,
    sheets_subject_id: Option<String>,
}

impl From<SettingsRow> for ProcessingConfig {
    fn from(r: SettingsRow) -> Self {
        ProcessingConfig {
            user_id: r.user_id,
            email: r.email,
            fitness: OAuthCredentials {
                access_token: r.fitness_access_token,
                refresh_token: r.fitness_refresh_token,
                expires_at: r.fitness_token_expires_at,
                subject_id: r.fitness_subject_id,
            },
            spreadsheet: OAuthCredentials {
                access_token: r.sheets_access_token,
                refresh_token: r.sheets_refresh_token,
                expires_at: r.sheets_token_expires_at,
                subject_id: r.sheets_subject_id,
            },
            spreadsheet_id: r.spreadsheet_id,
            timezone: r.timezone,
            automation_enabled: r.automation_enabled,
            email_notifications_enabled: r.email_notifications_enabled,
        }
    }
}

impl SettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, user_id: i64) -> anyhow::Result<Option<ProcessingConfig>> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r#"
            SELECT user_id, email, spreadsheet_id, timezone,
                   automation_enabled, email_notifications_enabled,
                   fitness_access_token, fitness_refresh_token,
                   fitness_token_expires_at, fitness_subject_id,
                   sheets_access_token, sheets_refresh_token,
                   sheets_token_expires_at, sheets_subject_id
            FROM user_sync_settings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("loading settings for user {user_id}"))?;

        Ok(row.map(ProcessingConfig::from))
    }

    pub async fn save_tokens(
        &self,
        user_id: i64,
        provider: Provider,
        credentials: &OAuthCredentials,
    ) -> anyhow::Result<()> {
        let sql = match provider {
            Provider::FitnessTracker => {
                r#"
                UPDATE user_sync_settings
                SET fitness_access_token = $2,
                    fitness_refresh_token = $3,
                    fitness_token_expires_at = $4,
                    updated_at = now()
                WHERE user_id = $1
                "#
            }
            Provider::Spreadsheet => {
                r#"
                UPDATE user_sync_settings
                SET sheets_access_token = $2,
                    sheets_refresh_token = $3,
                    sheets_token_expires_at = $4,
                    updated_at = now()
                WHERE user_id = $1
                "#
            }
        };

        let res = sqlx::query(sql)
            .bind(user_id)
            .bind(&credentials.access_token)
            .bind(&credentials.refresh_token)
            .bind(credentials.expires_at)
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            bail!("no settings row for user {user_id}");
        }
        Ok(())
    }
}

/// Requirements a user must meet before a sync is worth enqueueing.
fn check_syncable(cfg: &ProcessingConfig) -> anyhow::Result<()> {
    if cfg.email.trim().is_empty() {
        bail!("user {} has no email", cfg.user_id);
    }
    if cfg.spreadsheet_id().is_none() {
        bail!("user {} has no spreadsheet configured", cfg.user_id);
    }
    let connected = Provider::ALL.into_iter().any(|p| {
        let creds = cfg.credentials(p);
        creds.access_token().is_some() || creds.refresh_token().is_some()
    });
    if !connected {
        bail!("user {} has not connected any provider", cfg.user_id);
    }
    Ok(())
}

#[async_trait]
impl ConfigProvider for SettingsStore {
    async fn get_processing_config(&self, user_id: i64) -> anyhow::Result<ProcessingConfig> {
        self.load(user_id)
            .await?
            .ok_or_else(|| anyhow!("no settings stored for user {user_id}"))
    }

    async fn validate_user_can_be_processed(&self, user_id: i64) -> anyhow::Result<()> {
        let cfg = self.get_processing_config(user_id).await?;
        check_syncable(&cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProcessingConfig {
        ProcessingConfig {
            user_id: 42,
            email: "athlete@example.com".into(),
            fitness: OAuthCredentials {
                access_token: None,
                refresh_token: Some("rt".into()),
                expires_at: None,
                subject_id: None,
            },
            spreadsheet: OAuthCredentials::default(),
            spreadsheet_id: Some("sheet-1".into()),
            timezone: "UTC".into(),
            automation_enabled: false,
            email_notifications_enabled: true,
        }
    }

    #[test]
    fn refresh_token_alone_counts_as_connected() {
        check_syncable(&config()).unwrap();
    }

    #[test]
    fn blank_spreadsheet_id_is_rejected() {
        let mut cfg = config();
        cfg.spreadsheet_id = Some("   ".into());
        let err = check_syncable(&cfg).unwrap_err();
        assert!(err.to_string().contains("no spreadsheet"));
    }

    #[test]
    fn user_without_any_tokens_is_rejected() {
        let mut cfg = config();
        cfg.fitness = OAuthCredentials::default();
        let err = check_syncable(&cfg).unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }

    #[test]
    fn row_columns_map_to_the_right_provider() {
        let expires = Utc::now();
        let row = SettingsRow {
            user_id: 7,
            email: "a@b.c".into(),
            spreadsheet_id: None,
            timezone: "Europe/Berlin".into(),
            automation_enabled: true,
            email_notifications_enabled: false,
            fitness_access_token: Some("fit".into()),
            fitness_refresh_token: None,
            fitness_token_expires_at: Some(expires),
            fitness_subject_id: Some("athlete-1".into()),
            sheets_access_token: Some("sheet".into()),
            sheets_refresh_token: Some("sheet-rt".into()),
            sheets_token_expires_at: None,
            sheets_subject_id: None,
        };

        let cfg = ProcessingConfig::from(row);
        assert_eq!(cfg.fitness.access_token(), Some("fit"));
        assert_eq!(cfg.fitness.expires_at, Some(expires));
        assert_eq!(cfg.spreadsheet.refresh_token(), Some("sheet-rt"));
        assert_eq!(cfg.timezone, "Europe/Berlin");
        assert!(cfg.automation_enabled);
    }
}
