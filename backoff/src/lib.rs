//! Backoff functionality.
#![warn(missing_docs)]

use observability_deps::tracing::info;
use rand::prelude::*;
use snafu::Snafu;
use std::ops::ControlFlow;
use std::time::Duration;

/// Exponential backoff with jitter
///
/// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Initial backoff.
    pub init_backoff: Duration,

    /// Maximum backoff.
    pub max_backoff: Duration,

    /// Multiplier for each backoff round.
    pub base: f64,

    /// Timeout until we try to retry.
    pub deadline: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(500),
            base: 3.,
            deadline: None,
        }
    }
}

/// Error after giving up retrying.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[expect(missing_docs)]
pub enum BackoffError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("Retry did not succeed within {deadline:?}"))]
    DeadlineExceeded { deadline: Duration, source: E },
}

/// Backoff result.
pub type BackoffResult<T, E> = Result<T, BackoffError<E>>;

/// [`Backoff`] can be created from a [`BackoffConfig`]
///
/// Consecutive calls to [`Backoff::next`] will return the next backoff interval
///
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
    total: f64,
    deadline: Option<f64>,
    rng: Option<Box<dyn RngCore + Sync + Send>>,
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("init_backoff", &self.init_backoff)
            .field("next_backoff_secs", &self.next_backoff_secs)
            .field("max_backoff_secs", &self.max_backoff_secs)
            .field("base", &self.base)
            .field("total", &self.total)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Backoff {
    /// Create a new [`Backoff`] from the provided [`BackoffConfig`].
    pub fn new(config: &BackoffConfig) -> Self {
        Self::new_with_rng(config, None)
    }

    /// Creates a new `Backoff` with the optional `rng`.
    ///
    /// Uses [`rand::rng()`] if no rng is provided.
    pub fn new_with_rng(
        config: &BackoffConfig,
        rng: Option<Box<dyn RngCore + Sync + Send>>,
    ) -> Self {
        let init_backoff = config.init_backoff.as_secs_f64();
        Self {
            init_backoff,
            next_backoff_secs: init_backoff,
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
            total: 0.0,
            deadline: config.deadline.map(|d| d.as_secs_f64()),
            rng,
        }
    }

    /// Returns the next backoff duration to wait for, if any.
    ///
    /// Returns `None` once the sum of all backoffs handed out reaches the deadline.
    pub fn next(&mut self) -> Option<Duration> {
        let upper = self.next_backoff_secs * self.base;
        let rand_backoff = if upper > self.init_backoff {
            let range = self.init_backoff..upper;
            match self.rng.as_mut() {
                Some(rng) => rng.random_range(range),
                None => rand::rng().random_range(range),
            }
        } else {
            self.init_backoff
        };

        let next_backoff = self.max_backoff_secs.min(rand_backoff);
        let res = std::mem::replace(&mut self.next_backoff_secs, next_backoff);
        self.total += res;

        if let Some(deadline) = self.deadline {
            if self.total >= deadline {
                return None;
            }
        }

        duration_try_from_secs_f64(res)
    }

    /// Perform an async operation that retries with a backoff
    ///
    /// The closure decides per attempt: [`ControlFlow::Break`] ends the loop with the given value,
    /// [`ControlFlow::Continue`] reports a retryable error.
    pub async fn retry_with_backoff<F, F1, B, E>(
        &mut self,
        task_name: &str,
        mut do_stuff: F,
    ) -> BackoffResult<B, E>
    where
        F: (FnMut() -> F1) + Send,
        F1: std::future::Future<Output = ControlFlow<B, E>> + Send,
        E: std::error::Error + Send + 'static,
    {
        loop {
            // first execute `F` and then use it, so we can avoid `F: Sync`.
            let do_stuff = do_stuff();

            let e = match do_stuff.await {
                ControlFlow::Break(r) => break Ok(r),
                ControlFlow::Continue(e) => e,
            };

            let backoff = match self.next() {
                Some(backoff) => backoff,
                None => {
                    return Err(BackoffError::DeadlineExceeded {
                        deadline: Duration::from_secs_f64(self.deadline.unwrap_or_default()),
                        source: e,
                    });
                }
            };

            info!(
                e=%e,
                task_name,
                backoff_secs = backoff.as_secs_f64(),
                "request encountered non-fatal error - backing off",
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

/// Same as [`Duration::try_from_secs_f64`] but clamps negative and non-finite inputs to zero.
fn duration_try_from_secs_f64(secs: f64) -> Option<Duration> {
    const MAX_AS_F64: f64 = u64::MAX as f64;

    if !secs.is_finite() || secs < 0.0 {
        return Some(Duration::ZERO);
    }
    if secs > MAX_AS_F64 {
        return Some(Duration::MAX);
    }

    Some(Duration::from_secs_f64(secs))
}
