use crate::error::{ConverterError, ErrorKind};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Kinds that are deterministic: retrying them can only fail the same way.
const NEVER_RETRY: [ErrorKind; 2] = [ErrorKind::FileValidation, ErrorKind::Security];

pub type RetryHook = Arc<dyn Fn(u32, &ConverterError) + Send + Sync>;

/// Bounded exponential backoff.
///
/// Delay before attempt `n + 1` is `initial_delay * backoff_factor^(n - 1)`,
/// capped at `max_delay`.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Error kinds worth another attempt. Validation and security failures
    /// are never retried, even when listed.
    pub retryable: Vec<ErrorKind>,
    /// Called with the failed attempt number and its error, before sleeping.
    pub on_retry: Option<RetryHook>,
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("retryable", &self.retryable)
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            retryable: vec![ErrorKind::Conversion, ErrorKind::CorruptedFile],
            on_retry: None,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_retryable(mut self, kinds: impl Into<Vec<ErrorKind>>) -> Self {
        self.retryable = kinds.into();
        self
    }

    pub fn on_retry(mut self, hook: impl Fn(u32, &ConverterError) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn is_retryable(&self, err: &ConverterError) -> bool {
        let kind = err.kind();
        !NEVER_RETRY.contains(&kind) && self.retryable.contains(&kind)
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            1.0
        };
        current.mul_f64(factor).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs out
/// of attempts. The last error is returned on exhaustion.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, ConverterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConverterError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay.min(config.max_delay);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts || !config.is_retryable(&e) => return Err(e),
            Err(e) => {
                if let Some(hook) = &config.on_retry {
                    hook(attempt, &e);
                }
                warn!(
                    "attempt {}/{} failed [{}]: {e}; retrying in {}ms",
                    attempt,
                    max_attempts,
                    e.code(),
                    delay.as_millis()
                );
                sleep(delay).await;
                delay = config.next_delay(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::default().with_delays(Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn succeeds_on_nth_attempt_and_hooks_n_minus_one_times() {
        let hooks = Arc::new(AtomicU32::new(0));
        let cfg = {
            let hooks = Arc::clone(&hooks);
            fast().with_max_attempts(4).on_retry(move |_, _| {
                hooks.fetch_add(1, Ordering::SeqCst);
            })
        };
        let calls = AtomicU32::new(0);
        let out = with_retry(&cfg, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ConverterError::conversion("flaky"))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let err = with_retry(&fast(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ConverterError::conversion(format!("failure {n}")))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.to_string(), "failure 2");
    }

    #[tokio::test]
    async fn deterministic_errors_are_not_retried() {
        let cfg = fast().with_retryable([ErrorKind::Security, ErrorKind::Conversion]);
        let calls = AtomicU32::new(0);
        let err = with_retry(&cfg, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ConverterError::security("script", None))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Security);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unlisted_kind_is_not_retried() {
        let calls = AtomicU32::new(0);
        let _ = with_retry(&fast(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ConverterError::invalid_parameter("quality", 0, "1-100"))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_is_capped() {
        let cfg = RetryConfig::default();
        let d = cfg.next_delay(Duration::from_secs(8));
        assert_eq!(d, Duration::from_secs(10));
    }
}
