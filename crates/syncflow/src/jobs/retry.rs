use rand::Rng;
use rand::{rngs::StdRng, SeedableRng};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 keeps the schedule deterministic.
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_pct: 0.0,
        }
    }
}

impl RetryConfig {
    /// Startup-time profile: gives up quickly instead of hanging boot.
    pub fn critical() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(8),
            jitter_pct: 0.0,
        }
    }

    /// Same delay between every attempt.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            jitter_pct: 0.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Last error returned by the operation, unchanged.
    #[error("{0}")]
    Operation(E),
    #[error("cancelled while waiting to retry {operation}")]
    Cancelled { operation: String },
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Delay to wait after failed attempt `attempt_no` (1-based):
/// `min(base * 2^(attempt_no-1), max)`, optionally jittered within the cap.
pub fn next_delay(attempt_no: u32, cfg: &RetryConfig, rng: &mut impl Rng) -> Duration {
    let attempt_no = attempt_no.max(1);

    // exponent = attempt_no - 1
    let exp = attempt_no - 1;

    // If the multiplier overflows, let the cap handle it.
    let pow2 = 1_u32.checked_shl(exp).unwrap_or(u32::MAX);

    let delay = cfg
        .base_delay
        .checked_mul(pow2)
        .unwrap_or(cfg.max_delay)
        .min(cfg.max_delay);

    if cfg.jitter_pct <= 0.0 {
        return delay;
    }

    // jitter in range [-jitter_pct, +jitter_pct]
    let secs = delay.as_secs_f64();
    let jitter_range = secs * cfg.jitter_pct;
    let jitter = rng.gen_range(-jitter_range..=jitter_range);
    let jittered = (secs + jitter).clamp(0.0, cfg.max_delay.as_secs_f64());
    Duration::from_secs_f64(jittered)
}

/// Runs `op` until it succeeds or `cfg.max_attempts` is used up, sleeping
/// with exponential backoff in between. Cancelling `cancel` during a sleep
/// returns [`RetryError::Cancelled`] immediately.
pub async fn retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    cfg: &RetryConfig,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = cfg.max_attempts.max(1);
    let mut rng = StdRng::from_entropy();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(operation, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if attempt >= max_attempts {
            tracing::error!(
                operation,
                attempts = attempt,
                error = %err,
                "operation failed, retries exhausted"
            );
            return Err(RetryError::Operation(err));
        }

        let delay = next_delay(attempt, cfg, &mut rng);
        tracing::warn!(
            operation,
            attempt,
            max_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "operation failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled {
                    operation: operation.to_string(),
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Fixed-delay variant of [`retry`] for operations that don't benefit from
/// growing waits.
pub async fn retry_fixed<T, E, F, Fut>(
    cancel: &CancellationToken,
    max_attempts: u32,
    delay: Duration,
    operation: &str,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry(cancel, &RetryConfig::fixed(max_attempts, delay), operation, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn delays_double_then_cap() {
        let cfg = RetryConfig {
            max_attempts: 5,
            base_delay: secs(1),
            max_delay: secs(10),
            jitter_pct: 0.0,
        };
        let mut rng = StdRng::seed_from_u64(7);

        let delays: Vec<Duration> = (1..=5).map(|n| next_delay(n, &cfg, &mut rng)).collect();
        assert_eq!(delays, vec![secs(1), secs(2), secs(4), secs(8), secs(10)]);
    }

    #[test]
    fn huge_attempt_numbers_stay_at_cap() {
        let cfg = RetryConfig::critical();
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(next_delay(64, &cfg, &mut rng), secs(8));
    }

    #[test]
    fn jitter_stays_within_cap() {
        let cfg = RetryConfig {
            jitter_pct: 0.5,
            ..RetryConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..10 {
            assert!(next_delay(attempt, &cfg, &mut rng) <= cfg.max_delay);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waits_follow_backoff_and_final_error_is_returned() {
        let cfg = RetryConfig {
            max_attempts: 6,
            base_delay: secs(1),
            max_delay: secs(10),
            jitter_pct: 0.0,
        };
        let cancel = CancellationToken::new();
        let started = Arc::new(Mutex::new(Vec::new()));

        let seen = started.clone();
        let res: Result<(), RetryError<String>> = retry(&cancel, &cfg, "always_fails", || {
            let seen = seen.clone();
            async move {
                let mut seen = seen.lock().unwrap();
                seen.push(Instant::now());
                Err(format!("failure #{}", seen.len()))
            }
        })
        .await;

        match res {
            Err(RetryError::Operation(msg)) => assert_eq!(msg, "failure #6"),
            other => panic!("unexpected result: {other:?}"),
        }

        let started = started.lock().unwrap();
        let gaps: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, vec![secs(1), secs(2), secs(4), secs(8), secs(10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_later_attempt_returns_value() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let res: Result<u32, RetryError<&str>> =
            retry(&cancel, &RetryConfig::default(), "flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("not yet")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(res.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_wait_returns_cancelled() {
        let cancel = CancellationToken::new();
        let cfg = RetryConfig {
            max_attempts: 5,
            base_delay: secs(30),
            max_delay: secs(60),
            jitter_pct: 0.0,
        };

        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            retry(&task_cancel, &cfg, "slow_backoff", || async {
                Err::<(), _>("down")
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let cancelled_at = Instant::now();
        cancel.cancel();

        let res = handle.await.unwrap();
        assert!(res.unwrap_err().is_cancelled());
        assert!(Instant::now() - cancelled_at < secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_variant_does_not_grow() {
        let cancel = CancellationToken::new();
        let started = Arc::new(Mutex::new(Vec::new()));

        let seen = started.clone();
        let _ = retry_fixed(&cancel, 4, secs(3), "fixed", || {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(Instant::now());
                Err::<(), _>("nope")
            }
        })
        .await;

        let started = started.lock().unwrap();
        let gaps: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, vec![secs(3), secs(3), secs(3)]);
    }
}
