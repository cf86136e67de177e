//! Retry policy implementation
//!
//! Semantics:
//! - The operation runs once, then again for every reactive outcome until the configured number
//!   of retries is spent (default 1), or forever with [`RetryPolicy::retry_forever`].
//! - Only outcomes matched by the policy's predicates are retried; with no predicates registered
//!   nothing is.
//! - When retries run out the last outcome is returned unchanged, success or error.
//! - Between attempts the policy waits for the backoff delay (zero by default) through its
//!   [`Sleeper`], then runs the `on_retry` hooks.
//! - `on_finally` hooks run exactly once per execution, also when the operation panics.
//!
//! ```rust
//! use std::time::Duration;
//! use bulwark::prelude::*;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<u32, std::io::Error>::new();
//! policy.retry_count(3).unwrap();
//! policy.wait_before_retry(Backoff::exponential(Duration::from_millis(100))).unwrap();
//! policy.with_sleeper(InstantSleeper).unwrap();
//! policy.react_on_error(|e| e.is_timeout()).unwrap();
//!
//! let value = policy.execute(|| async { Ok(1) }).await.unwrap();
//! assert_eq!(value, 1);
//! # });
//! ```

use crate::backoff::BackoffStrategy;
use crate::error::{ConfigError, ResilienceError};
use crate::hooks::{HookOutcome, Hooks};
use crate::policy::{Operation, OperationFuture, Policy, PolicyCore};
use crate::predicate::{ReactivePolicy, Reactions};
use crate::settings::{count_to_u64, positive};
use crate::sleeper::{Sleeper, TokioSleeper};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Passed to `on_retry` hooks: the outcome that triggered the retry and its 1-based number.
#[derive(Debug)]
pub struct RetryAttempt<T, E> {
    pub outcome: Result<T, ResilienceError<E>>,
    pub retry_count: usize,
}

struct RetryConfig<T, E> {
    /// `None` retries forever.
    total: Option<usize>,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    sleeper: Arc<dyn Sleeper>,
    reactions: Reactions<T, E>,
    on_retry: Hooks<RetryAttempt<T, E>>,
    on_finally: Hooks<()>,
}

impl<T, E> Clone for RetryConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            total: self.total,
            backoff: self.backoff.clone(),
            sleeper: self.sleeper.clone(),
            reactions: self.reactions.clone(),
            on_retry: self.on_retry.clone(),
            on_finally: self.on_finally.clone(),
        }
    }
}

impl<T, E> Default for RetryConfig<T, E> {
    fn default() -> Self {
        Self {
            total: Some(1),
            backoff: None,
            sleeper: Arc::new(TokioSleeper),
            reactions: Reactions::default(),
            on_retry: Hooks::default(),
            on_finally: Hooks::default(),
        }
    }
}

impl<T, E> RetryConfig<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    async fn run(&self, operation: Operation<T, E>) -> Result<T, ResilienceError<E>> {
        let mut retry_count = 0usize;
        loop {
            let outcome = operation().await;
            if !self.reactions.is_reactive(&outcome).await {
                return outcome;
            }
            retry_count += 1;
            if matches!(self.total, Some(total) if retry_count > total) {
                tracing::debug!(retries = retry_count - 1, "Retries exhausted");
                return outcome;
            }

            let delay =
                self.backoff.as_ref().map(|b| b.delay(retry_count)).unwrap_or(Duration::ZERO);
            if !delay.is_zero() {
                self.sleeper.sleep(delay).await;
            }
            tracing::debug!(retry_count, ?delay, "Retrying operation");
            self.on_retry.run("on_retry", &RetryAttempt { outcome, retry_count }).await;
        }
    }
}

/// Re-runs an operation while its outcome is reactive.
pub struct RetryPolicy<T, E> {
    core: Arc<PolicyCore<RetryConfig<T, E>, T, E>>,
}

impl<T, E> Clone for RetryPolicy<T, E> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone() }
    }
}

impl<T, E> Default for RetryPolicy<T, E> {
    fn default() -> Self {
        Self { core: Arc::new(PolicyCore::new(RetryConfig::default())) }
    }
}

impl<T, E> std::fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.core.config();
        f.debug_struct("RetryPolicy")
            .field("total", &config.config.total)
            .field("executing", &self.core.executing())
            .finish()
    }
}

impl<T, E> RetryPolicy<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retry at most `count` times after the initial call.
    pub fn retry_count(&self, count: usize) -> Result<(), ConfigError> {
        positive("retry_count", count_to_u64(count))?;
        self.core.configure(|c| c.total = Some(count))
    }

    /// Retry until the outcome is no longer reactive.
    pub fn retry_forever(&self) -> Result<(), ConfigError> {
        self.core.configure(|c| c.total = None)
    }

    /// Wait `strategy.delay(n)` before retry `n`.
    pub fn wait_before_retry<B>(&self, strategy: B) -> Result<(), ConfigError>
    where
        B: BackoffStrategy + 'static,
    {
        let strategy: Arc<dyn BackoffStrategy> = Arc::new(strategy);
        self.core.configure(|c| c.backoff = Some(strategy))
    }

    /// Replace the sleeper used for backoff waits.
    pub fn with_sleeper<S>(&self, sleeper: S) -> Result<(), ConfigError>
    where
        S: Sleeper + 'static,
    {
        let sleeper: Arc<dyn Sleeper> = Arc::new(sleeper);
        self.core.configure(|c| c.sleeper = sleeper)
    }

    /// Called after the backoff wait, before each retry.
    pub fn on_retry<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn(&RetryAttempt<T, E>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.core.configure(move |c| c.on_retry.push(hook))
    }

    /// Called once when an execution finishes, whatever the outcome.
    pub fn on_finally<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.core.configure(move |c| c.on_finally.push_unit(hook))
    }
}

impl<T, E> Policy<T, E> for RetryPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E> {
        let core = self.core.clone();
        Box::pin(async move {
            let execution = core.enter();
            let operation = execution.delegate(operation);
            let config = &execution.config;

            let outcome = AssertUnwindSafe(config.run(operation)).catch_unwind().await;
            config.on_finally.fire("on_finally").await;
            match outcome {
                Ok(outcome) => outcome,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }

    fn wrap(&self, inner: Arc<dyn Policy<T, E>>) -> Result<(), ConfigError> {
        self.core.wrap(inner)
    }

    fn executing(&self) -> usize {
        self.core.executing()
    }
}

impl<T, E> ReactivePolicy<T, E> for RetryPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn add_reaction(&self, add: &dyn Fn(&mut Reactions<T, E>)) -> Result<(), ConfigError> {
        self.core.configure(|c| add(&mut c.reactions))
    }
}
