//! Retry Logic
//!
//! Automatic retry with exponential backoff for transient failures.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scenario_orchestrator::resilience::{retry_if, RetryPolicy};
//!
//! let policy = RetryPolicy::exponential(3, Duration::from_secs(1));
//!
//! let result = retry_if(&policy, || worker.invoke(&config, &prompt), ModelError::is_retryable).await?;
//! ```

use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    pub max_attempts: usize,
    /// Delay schedule between attempts.
    pub strategy: RetryStrategy,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

/// Retry backoff strategy
#[derive(Clone, Debug, PartialEq)]
pub enum RetryStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff (delay multiplies each time, capped)
    Exponential {
        /// Delay before the second attempt.
        initial_delay: Duration,
        /// Upper bound on any single delay.
        max_delay: Duration,
        /// Growth factor per attempt.
        multiplier: f64,
    },
}

impl RetryPolicy {
    /// Create policy with fixed delay
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Fixed(delay),
            jitter: false,
        }
    }

    /// Create policy with exponential backoff, doubling up to a 60 s cap.
    pub fn exponential(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Exponential {
                initial_delay,
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
            jitter: false,
        }
    }

    /// Override the exponential cap. No-op for fixed policies.
    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        if let RetryStrategy::Exponential { max_delay, .. } = &mut self.strategy {
            *max_delay = cap;
        }
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let base = self.calculate_delay(attempt);
        if !self.jitter {
            return base;
        }
        match &self.strategy {
            RetryStrategy::Exponential { max_delay, .. } => with_jitter(base).min(*max_delay),
            RetryStrategy::Fixed(_) => with_jitter(base),
        }
    }

    fn calculate_delay(&self, attempt: usize) -> Duration {
        match &self.strategy {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
                let millis = initial_delay.as_millis() as f64 * multiplier.powi(exp);
                if !millis.is_finite() || millis >= max_delay.as_millis() as f64 {
                    return *max_delay;
                }
                Duration::from_millis(millis as u64).min(*max_delay)
            }
        }
    }
}

/// Conditional retry: only retry if `should_retry` returns true.
///
/// Runs `f` up to `policy.max_attempts` times, sleeping per the policy
/// between attempts. Non-retryable errors return immediately.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted, or the first
/// non-retryable error.
pub async fn retry_if<F, Fut, T, E, P>(policy: &RetryPolicy, mut f: F, mut should_retry: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "retry: operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!(error = %e, "retry: error is not retryable");
                    return Err(e);
                }

                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %e, "retry: all attempts exhausted");
                    return Err(e);
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    attempt = attempt,
                    max = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retry: transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry with jitter to prevent thundering herd
pub fn with_jitter(duration: Duration) -> Duration {
    use rand::Rng;
    let quarter = (duration.as_millis() / 4) as u64;
    if quarter == 0 {
        return duration;
    }
    let jitter = rand::thread_rng().gen_range(0..quarter);
    duration + Duration::from_millis(jitter)
}
