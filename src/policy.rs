//! The contract shared by every policy.
//!
//! A policy executes an [`Operation`]: a repeatable async closure producing
//! `Result<T, ResilienceError<E>>`. Policies are cheap `Clone` handles over shared state; all
//! clones observe the same counters, circuit and cache.
//!
//! Composition happens through [`Policy::wrap`]: once `outer.wrap(inner)` is set, the operation
//! the outer policy reacts to is "run `inner` with the real operation". Wrapping shares the inner
//! policy, so the caller can keep using (and inspecting) it independently.
//!
//! ```rust
//! use bulwark::prelude::*;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let retry = RetryPolicy::<u32, std::io::Error>::new();
//! retry.react_on_result(|value| *value == 0).unwrap();
//! let timeout = TimeoutPolicy::new();
//! timeout.timeout_after(1_000).unwrap();
//!
//! retry.wrap(timeout.shared()).unwrap();
//! let value = retry.execute(|| async { Ok(7) }).await.unwrap();
//! assert_eq!(value, 7);
//! # });
//! ```

use crate::error::{ConfigError, ResilienceError};
use crate::settings::{Execution, Settings};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by an operation or by a policy execution.
pub type OperationFuture<T, E> = BoxFuture<'static, Result<T, ResilienceError<E>>>;

/// A protected operation, callable as many times as a policy needs.
pub type Operation<T, E> = Arc<dyn Fn() -> OperationFuture<T, E> + Send + Sync>;

/// Box an async closure into an [`Operation`].
pub fn operation<T, E, F, Fut>(f: F) -> Operation<T, E>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// Executable resilience policy.
pub trait Policy<T, E>: Send + Sync {
    /// Run an already boxed operation under this policy (and its wrapped policy, if any).
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E>;

    /// Delegate to `inner`: this policy's logic now governs `inner.execute(operation)`.
    ///
    /// Fails with [`ConfigError::ModificationNotAllowed`] while executing.
    fn wrap(&self, inner: Arc<dyn Policy<T, E>>) -> Result<(), ConfigError>;

    /// Number of executions currently in flight.
    fn executing(&self) -> usize;

    /// Run `operation` under this policy.
    fn execute<F, Fut>(&self, operation: F) -> OperationFuture<T, E>
    where
        Self: Sized,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    {
        self.execute_operation(crate::policy::operation(operation))
    }

    /// A shared trait-object handle to this policy, for `wrap` and `combine`.
    fn shared(&self) -> Arc<dyn Policy<T, E>>
    where
        Self: Clone + Sized + 'static,
    {
        Arc::new(self.clone())
    }
}

impl<T, E, P> Policy<T, E> for Arc<P>
where
    P: Policy<T, E> + ?Sized,
{
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E> {
        (**self).execute_operation(operation)
    }

    fn wrap(&self, inner: Arc<dyn Policy<T, E>>) -> Result<(), ConfigError> {
        (**self).wrap(inner)
    }

    fn executing(&self) -> usize {
        (**self).executing()
    }
}

/// Configuration snapshot of a policy: its own settings plus the wrapped policy.
pub(crate) struct Configured<C, T, E> {
    pub(crate) config: C,
    wrapped: Option<Arc<dyn Policy<T, E>>>,
}

impl<C: Clone, T, E> Clone for Configured<C, T, E> {
    fn clone(&self) -> Self {
        Self { config: self.config.clone(), wrapped: self.wrapped.clone() }
    }
}

impl<C, T, E> Configured<C, T, E>
where
    T: 'static,
    E: 'static,
{
    /// The operation this policy's own logic should run.
    pub(crate) fn delegate(&self, operation: Operation<T, E>) -> Operation<T, E> {
        match &self.wrapped {
            None => operation,
            Some(inner) => {
                let inner = inner.clone();
                Arc::new(move || inner.execute_operation(operation.clone()))
            }
        }
    }
}

/// Execution depth + wrap relationship + settings, embedded by every policy.
pub(crate) struct PolicyCore<C, T, E> {
    settings: Settings<Configured<C, T, E>>,
}

impl<C: Clone, T, E> PolicyCore<C, T, E> {
    pub(crate) fn new(config: C) -> Self {
        Self { settings: Settings::new(Configured { config, wrapped: None }) }
    }

    pub(crate) fn configure<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R, ConfigError> {
        self.settings.update(|configured| f(&mut configured.config))
    }

    pub(crate) fn wrap(&self, inner: Arc<dyn Policy<T, E>>) -> Result<(), ConfigError> {
        self.settings.update(|configured| configured.wrapped = Some(inner))
    }

    pub(crate) fn enter(&self) -> Execution<'_, Configured<C, T, E>> {
        self.settings.enter()
    }

    pub(crate) fn config(&self) -> Arc<Configured<C, T, E>> {
        self.settings.snapshot()
    }

    pub(crate) fn executing(&self) -> usize {
        self.settings.executing()
    }
}

/// Pass-through policy: runs the (wrapped) operation untouched.
pub struct NopPolicy<T, E> {
    core: Arc<PolicyCore<(), T, E>>,
}

impl<T, E> Clone for NopPolicy<T, E> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone() }
    }
}

impl<T, E> Default for NopPolicy<T, E> {
    fn default() -> Self {
        Self { core: Arc::new(PolicyCore::new(())) }
    }
}

impl<T, E> NopPolicy<T, E> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T, E> std::fmt::Debug for NopPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NopPolicy").field("executing", &self.core.executing()).finish()
    }
}

impl<T, E> Policy<T, E> for NopPolicy<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E> {
        let core = self.core.clone();
        Box::pin(async move {
            let execution = core.enter();
            let operation = execution.delegate(operation);
            operation().await
        })
    }

    fn wrap(&self, inner: Arc<dyn Policy<T, E>>) -> Result<(), ConfigError> {
        self.core.wrap(inner)
    }

    fn executing(&self) -> usize {
        self.core.executing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    #[tokio::test]
    async fn nop_policy_runs_operation() {
        let policy = NopPolicy::<u32, TestError>::new();
        let result = policy.execute(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);

        let result = policy
            .execute(|| async { Err::<u32, _>(ResilienceError::Inner(TestError("x".into()))) })
            .await;
        assert_eq!(result.unwrap_err(), ResilienceError::Inner(TestError("x".into())));
    }

    #[tokio::test]
    async fn wrap_is_refused_while_executing() {
        let outer = NopPolicy::<(), TestError>::new();
        let inner = NopPolicy::<(), TestError>::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release_rx = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let running = outer.execute(move || {
            let release_rx = release_rx.clone();
            async move {
                if let Some(rx) = release_rx.lock().await.take() {
                    let _ = rx.await;
                }
                Ok(())
            }
        });
        let handle = tokio::spawn(running);
        tokio::task::yield_now().await;
        while outer.executing() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(outer.wrap(inner.shared()), Err(ConfigError::ModificationNotAllowed));
        release_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(outer.executing(), 0);
        assert!(outer.wrap(inner.shared()).is_ok());
    }

    #[tokio::test]
    async fn wrapped_policy_sees_the_operation() {
        let outer = NopPolicy::<u32, TestError>::new();
        let inner = NopPolicy::<u32, TestError>::new();
        outer.wrap(inner.shared()).unwrap();

        let observed = Arc::new(AtomicUsize::new(0));
        let probe = inner.clone();
        let observed_clone = observed.clone();
        let result = outer
            .execute(move || {
                let probe = probe.clone();
                let observed = observed_clone.clone();
                async move {
                    observed.store(probe.executing(), Ordering::SeqCst);
                    Ok(5)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 5);
        assert_eq!(observed.load(Ordering::SeqCst), 1, "inner policy should be executing");
    }

    #[tokio::test]
    async fn execution_depth_released_on_panic() {
        let policy = NopPolicy::<(), TestError>::new();
        let running = policy.execute(|| async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        let result = std::panic::AssertUnwindSafe(running).catch_unwind().await;
        assert!(result.is_err());
        assert_eq!(policy.executing(), 0);
    }
}
