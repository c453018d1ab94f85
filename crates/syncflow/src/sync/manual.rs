use crate::jobs::error_codes::{ErrorCode, JobError};
use crate::jobs::model::{Job, JobType};
use crate::jobs::processor::JobProcessor;
use crate::jobs::retry::{retry, RetryConfig, RetryError};
use crate::sync::collaborators::{
    Activity, ActivityFetcher, ConfigProvider, SpreadsheetAccess, SpreadsheetInfo, TokenRefresher,
};
use crate::sync::settings::{ProcessingConfig, Provider};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Longest wait for the next fan-out result before the job is failed.
pub const COLLECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum SourcePayload {
    Activities(Vec<Activity>),
    Spreadsheet(SpreadsheetInfo),
}

/// What one fan-out unit reports back.
#[derive(Debug)]
pub struct SourceResult {
    pub source: Provider,
    pub outcome: Result<SourcePayload, JobError>,
}

pub struct ManualSyncProcessor {
    configs: Arc<dyn ConfigProvider>,
    tokens: Option<Arc<dyn TokenRefresher>>,
    activities: Arc<dyn ActivityFetcher>,
    sheets: Arc<dyn SpreadsheetAccess>,
    retry_cfg: RetryConfig,
    collect_timeout: Duration,
}

impl ManualSyncProcessor {
    pub fn new(
        configs: Arc<dyn ConfigProvider>,
        activities: Arc<dyn ActivityFetcher>,
        sheets: Arc<dyn SpreadsheetAccess>,
    ) -> Self {
        Self {
            configs,
            tokens: None,
            activities,
            sheets,
            retry_cfg: RetryConfig::default(),
            collect_timeout: COLLECT_TIMEOUT,
        }
    }

    pub fn with_token_refresher(mut self, tokens: Arc<dyn TokenRefresher>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_retry(mut self, cfg: RetryConfig) -> Self {
        self.retry_cfg = cfg;
        self
    }

    pub fn with_collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = timeout;
        self
    }

    async fn run(&self, job: &Job, cancel: &CancellationToken) -> Result<(), JobError> {
        // 1) per-user settings
        let mut config = self
            .configs
            .get_processing_config(job.user_id)
            .await
            .map_err(|e| JobError::config(format!("load processing config: {e:#}")))?;

        // 2) swap in fresh tokens where needed
        if let Some(tokens) = &self.tokens {
            self.refresh_stale_tokens(tokens.as_ref(), &mut config, cancel)
                .await?;
        }

        // 3) fan out, one unit per provider with a usable token
        let (tx, mut rx) = mpsc::channel::<SourceResult>(Provider::ALL.len());
        let mut units = JoinSet::new();
        let mut launched = 0;

        for provider in config.valid_providers_at(Utc::now()) {
            match provider {
                Provider::FitnessTracker => {
                    let fetcher = self.activities.clone();
                    let token = config.fitness.access_token().unwrap_or_default().to_string();
                    let cancel = cancel.clone();
                    let retry_cfg = self.retry_cfg.clone();

                    spawn_unit(&mut units, tx.clone(), provider, async move {
                        retry(&cancel, &retry_cfg, "fetch_recent_activities", || {
                            fetcher.fetch_recent_activities(&token)
                        })
                        .await
                        .map(SourcePayload::Activities)
                        .map_err(external_error)
                    });
                }
                Provider::Spreadsheet => {
                    let Some(spreadsheet_id) = config.spreadsheet_id().map(str::to_string) else {
                        return Err(JobError::config("no spreadsheet configured"));
                    };
                    let sheets = self.sheets.clone();
                    let token = config
                        .spreadsheet
                        .access_token()
                        .unwrap_or_default()
                        .to_string();
                    let cancel = cancel.clone();
                    let retry_cfg = self.retry_cfg.clone();

                    spawn_unit(&mut units, tx.clone(), provider, async move {
                        retry(&cancel, &retry_cfg, "validate_spreadsheet_access", || {
                            sheets.validate_access(&token, &spreadsheet_id)
                        })
                        .await
                        .map(SourcePayload::Spreadsheet)
                        .map_err(external_error)
                    });
                }
            }
            launched += 1;
        }
        drop(tx);

        if launched == 0 {
            return Err(JobError::config("no provider has a valid access token"));
        }

        // 4) fan in
        let results = self.collect(&mut rx, launched, cancel).await?;
        drop(units);

        // 5) all or nothing
        let failures: Vec<&JobError> = results
            .iter()
            .filter_map(|r| r.outcome.as_ref().err())
            .collect();
        if !failures.is_empty() {
            let listed: Vec<String> = results
                .iter()
                .filter_map(|r| r.outcome.as_ref().err().map(|e| format!("{}: {e}", r.source)))
                .collect();
            return Err(JobError::new(
                aggregate_code(&failures),
                format!(
                    "{} of {} sources failed: {}",
                    failures.len(),
                    launched,
                    listed.join("; ")
                ),
            ));
        }

        // 6) row transformation, sheet writes and the follow-up notification
        //    job are not part of this processor yet.
        let activity_count = results
            .iter()
            .map(|r| match &r.outcome {
                Ok(SourcePayload::Activities(a)) => a.len(),
                _ => 0,
            })
            .sum::<usize>();
        tracing::info!(
            sources = launched,
            activities = activity_count,
            spreadsheet_id = config.spreadsheet_id().unwrap_or("-"),
            notify = config.email_notifications_enabled,
            "manual sync fetched all sources"
        );

        Ok(())
    }

    async fn refresh_stale_tokens(
        &self,
        refresher: &dyn TokenRefresher,
        config: &mut ProcessingConfig,
        cancel: &CancellationToken,
    ) -> Result<(), JobError> {
        let now = Utc::now();

        for provider in Provider::ALL {
            let creds = config.credentials(provider);
            if !creds.is_refreshable_at(now) {
                if !creds.is_valid_at(now) {
                    tracing::debug!(%provider, "token stale and not refreshable, skipping");
                }
                continue;
            }
            let refresh_token = creds.refresh_token().unwrap_or_default().to_string();

            let refreshed = retry(cancel, &self.retry_cfg, "refresh_oauth_token", || {
                refresher.refresh(provider, &refresh_token)
            })
            .await
            .map_err(|e| match e {
                RetryError::Cancelled { .. } => JobError::cancelled(),
                RetryError::Operation(e) => JobError::new(
                    ErrorCode::TokenRefresh,
                    format!("refresh {provider} token: {e:#}"),
                ),
            })?;

            config.credentials_mut(provider).apply_refresh(refreshed);
            refresher
                .persist_tokens(config.user_id, provider, config.credentials(provider))
                .await
                .map_err(|e| {
                    JobError::new(
                        ErrorCode::TokenRefresh,
                        format!("persist refreshed {provider} token: {e:#}"),
                    )
                })?;

            tracing::info!(%provider, "refreshed stale token");
        }

        Ok(())
    }

    async fn collect(
        &self,
        rx: &mut mpsc::Receiver<SourceResult>,
        expected: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourceResult>, JobError> {
        let mut results = Vec::with_capacity(expected);

        while results.len() < expected {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::cancelled()),
                received = rx.recv() => match received {
                    Some(result) => results.push(result),
                    None => {
                        return Err(JobError::new(
                            ErrorCode::Panic,
                            format!(
                                "fan-out ended early ({} of {expected} results)",
                                results.len()
                            ),
                        ));
                    }
                },
                _ = tokio::time::sleep(self.collect_timeout) => {
                    return Err(JobError::new(
                        ErrorCode::Timeout,
                        format!(
                            "no fan-out result within {}s ({} of {expected} received)",
                            self.collect_timeout.as_secs(),
                            results.len()
                        ),
                    ));
                }
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl JobProcessor for ManualSyncProcessor {
    fn name(&self) -> &'static str {
        "manual_sync"
    }

    fn can_process(&self, job_type: JobType) -> bool {
        job_type == JobType::ManualSync
    }

    async fn process(&self, job: &Job, cancel: &CancellationToken) -> Result<(), JobError> {
        match tokio::time::timeout(job.timeout(), self.run(job, cancel)).await {
            Ok(res) => res,
            Err(_) => Err(JobError::new(
                ErrorCode::Timeout,
                format!("job exceeded its {}s budget", job.timeout().as_secs()),
            )),
        }
    }
}

/// Runs one fan-out unit. A panic inside `work` is reported as a `PANIC`
/// result instead of unwinding the task.
fn spawn_unit<F>(
    units: &mut JoinSet<()>,
    tx: mpsc::Sender<SourceResult>,
    source: Provider,
    work: F,
) where
    F: Future<Output = Result<SourcePayload, JobError>> + Send + 'static,
{
    units.spawn(
        async move {
            let outcome = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(JobError::from_panic(payload)));

            if let Err(e) = &outcome {
                tracing::warn!(%source, code = %e.code, error = %e.message, "source failed");
            }
            // Receiver is gone only if the job already gave up.
            let _ = tx.send(SourceResult { source, outcome }).await;
        }
        .in_current_span(),
    );
}

fn external_error(err: RetryError<anyhow::Error>) -> JobError {
    match err {
        RetryError::Cancelled { .. } => JobError::cancelled(),
        RetryError::Operation(e) => JobError::new(ErrorCode::ExternalApi, format!("{e:#}")),
    }
}

fn aggregate_code(failures: &[&JobError]) -> ErrorCode {
    if failures.iter().any(|e| e.code == ErrorCode::Panic) {
        ErrorCode::Panic
    } else if failures.iter().any(|e| e.code == ErrorCode::Cancelled) {
        ErrorCode::Cancelled
    } else {
        ErrorCode::ExternalApi
    }
}
