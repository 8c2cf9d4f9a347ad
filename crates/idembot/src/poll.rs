//! Bounded polling for values GitHub computes lazily.
//!
//! A pull request's `mergeable` field is `null` until GitHub has finished a
//! background job. The only way to learn the answer is to fetch again later,
//! so polling is a fixed number of attempts at a constant interval, built on
//! the same `backon` machinery used for retries elsewhere.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};

/// Default number of fetches before giving up.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 5;

/// Default pause between fetches.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Total fetches, including the first one.
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl PollConfig {
    #[must_use]
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Constant backoff yielding `attempts - 1` waits.
    #[must_use]
    pub fn into_backoff(self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.interval)
            .with_max_times(self.attempts.saturating_sub(1) as usize)
    }
}

enum Step<E> {
    Pending,
    Failed(E),
}

/// Call `fetch` until it yields `Some`, at most `config.attempts` times.
///
/// Returns the last observation, which is `None` when every attempt came back
/// unresolved. Errors from `fetch` end the poll immediately.
pub async fn poll_until_resolved<T, E, F, Fut>(
    config: PollConfig,
    mut fetch: F,
    on_attempt: impl Fn(u32),
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let attempt = AtomicU32::new(0);

    let step = || {
        let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
        on_attempt(n);
        let fut = fetch();
        async move {
            match fut.await {
                Ok(Some(value)) => Ok(value),
                Ok(None) => Err(Step::Pending),
                Err(e) => Err(Step::Failed(e)),
            }
        }
    };

    let outcome = step
        .retry(config.into_backoff())
        .notify(|_: &Step<E>, dur: Duration| {
            tracing::debug!(
                attempt = attempt.load(Ordering::SeqCst),
                wait_ms = dur.as_millis() as u64,
                "Value not resolved yet, polling again"
            );
        })
        .when(|e: &Step<E>| matches!(e, Step::Pending))
        .await;

    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(Step::Pending) => Ok(None),
        Err(Step::Failed(e)) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fast(attempts: u32) -> PollConfig {
        PollConfig::new(attempts, Duration::ZERO)
    }

    #[test]
    fn defaults_are_five_attempts_three_seconds_apart() {
        let config = PollConfig::default();
        assert_eq!(config.attempts, 5);
        assert_eq!(config.interval, Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn gives_up_after_configured_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<Option<bool>, ()> = poll_until_resolved(
            fast(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(None) }
            },
            |_| {},
        )
        .await;

        assert_eq!(result, Ok(None));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn stops_as_soon_as_value_resolves() {
        let calls = AtomicUsize::new(0);
        let result: Result<Option<bool>, ()> = poll_until_resolved(
            fast(5),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok(if n == 2 { Some(true) } else { None }) }
            },
            |_| {},
        )
        .await;

        assert_eq!(result, Ok(Some(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn errors_end_the_poll() {
        let calls = AtomicUsize::new(0);
        let result: Result<Option<bool>, &str> = poll_until_resolved(
            fast(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("boom") }
            },
            |_| {},
        )
        .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_interval_between_attempts() {
        let start = tokio::time::Instant::now();
        let result: Result<Option<bool>, ()> = poll_until_resolved(
            PollConfig::default(),
            || async { Ok(None) },
            |_| {},
        )
        .await;

        assert_eq!(result, Ok(None));
        assert!(start.elapsed() >= Duration::from_millis(12_000));
    }
}
