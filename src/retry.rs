//! Bounded retry with a fixed per-attempt delay.
//!
//! A [`RetryPolicy`] is a plain value; [`retry`] is the executor that
//! consumes it. The executor never invents its own timeout error: when the
//! cumulative budget runs out the caller gets the last failure the action
//! produced.

use crate::errors::HarnessError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Sleep between a failed attempt and the next one.
    pub delay: Duration,
    /// Once this much time has elapsed since the first attempt, the next
    /// failure is final.
    pub budget: Duration,
}

impl RetryPolicy {
    /// Policy shared by the control-service probe, the database probe and
    /// the port-release wait.
    pub const DEFAULT: RetryPolicy = RetryPolicy::new(
        Duration::from_millis(100),
        Duration::from_millis(3000),
    );

    pub const fn new(delay: Duration, budget: Duration) -> Self {
        Self { delay, budget }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Run `action` until it succeeds or the policy's budget is spent.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut action: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if start.elapsed() >= policy.budget {
                    tracing::debug!(attempt, error = %err, "retry budget exhausted");
                    return Err(err);
                }
                tracing::trace!(attempt, error = %err, "attempt failed, retrying");
                sleep(policy.delay).await;
            }
        }
    }
}

/// [`retry`], mapping exhaustion to [`HarnessError::RetryBudgetExceeded`]
/// with `what` describing the awaited condition.
///
/// Each attempt is cut off at whatever is left of the budget (at least one
/// `delay`), so an action that hangs cannot hold the caller past it.
pub async fn retry_or_give_up<F, Fut, T, E>(
    policy: &RetryPolicy,
    what: impl Into<String>,
    mut action: F,
) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + Into<anyhow::Error>,
{
    let start = Instant::now();
    let RetryPolicy { delay, budget } = *policy;
    retry(policy, || {
        let cap = budget.saturating_sub(start.elapsed()).max(delay);
        let attempt = action();
        async move {
            match timeout(cap, attempt).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(anyhow::anyhow!("attempt gave no answer within {cap:?}")),
            }
        }
    })
    .await
    .map_err(|source: anyhow::Error| HarnessError::RetryBudgetExceeded {
        what: what.into(),
        source,
    })
}
