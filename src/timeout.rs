//! Timeout policy implementation
//!
//! The operation is spawned onto the runtime and raced against a deadline. Cancellation is
//! soft: on timeout the caller gets [`ResilienceError::Timeout`] while the spawned operation keeps
//! running to completion and its outcome is dropped.

use crate::error::{ConfigError, ResilienceError};
use crate::hooks::{HookOutcome, Hooks};
use crate::policy::{Operation, OperationFuture, Policy, PolicyCore};
use crate::settings::positive;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct TimeoutConfig {
    timeout: Option<Duration>,
    on_timeout: Hooks<Duration>,
}

/// Bounds how long callers wait for an operation.
///
/// Without [`TimeoutPolicy::timeout_after`] the policy just passes through.
pub struct TimeoutPolicy<T, E> {
    core: Arc<PolicyCore<TimeoutConfig, T, E>>,
}

impl<T, E> Clone for TimeoutPolicy<T, E> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone() }
    }
}

impl<T, E> Default for TimeoutPolicy<T, E> {
    fn default() -> Self {
        Self { core: Arc::new(PolicyCore::new(TimeoutConfig::default())) }
    }
}

impl<T, E> std::fmt::Debug for TimeoutPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutPolicy")
            .field("timeout", &self.timeout())
            .field("executing", &self.core.executing())
            .finish()
    }
}

impl<T, E> TimeoutPolicy<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on the operation after `millis` milliseconds.
    pub fn timeout_after(&self, millis: u64) -> Result<(), ConfigError> {
        let millis = positive("timeout_after", millis)?;
        self.core.configure(|c| c.timeout = Some(Duration::from_millis(millis)))
    }

    /// Called with the configured limit each time the deadline wins the race.
    pub fn on_timeout<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn(Duration) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.core.configure(move |c| c.on_timeout.push(move |limit: &Duration| hook(*limit)))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.core.config().config.timeout
    }
}

impl<T, E> Policy<T, E> for TimeoutPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E> {
        let core = self.core.clone();
        Box::pin(async move {
            let execution = core.enter();
            let operation = execution.delegate(operation);
            let Some(limit) = execution.config.timeout else {
                return operation().await;
            };

            let mut task = tokio::spawn(operation());
            tokio::select! {
                biased;
                joined = &mut task => match joined {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                    // aborted by runtime shutdown; nothing left to report to
                    Err(_) => futures::future::pending().await,
                },
                _ = tokio::time::sleep(limit) => {
                    tracing::warn!(timeout = ?limit, "operation timed out");
                    execution.config.on_timeout.run("on_timeout", &limit).await;
                    Err(ResilienceError::Timeout { timed_out_after: limit })
                }
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
