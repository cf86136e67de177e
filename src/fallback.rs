//! Fallback policy
//!
//! Runs the primary operation, then each registered fallback in order, until an outcome is not
//! reactive. The chain is walked from the configuration snapshot taken when the execution was
//! admitted. Fallback links run directly; a wrapped policy only governs the primary operation.

use crate::error::{ConfigError, ResilienceError};
use crate::hooks::{HookOutcome, Hooks};
use crate::policy::{operation, Operation, OperationFuture, Policy, PolicyCore};
use crate::predicate::{ReactivePolicy, Reactions};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// The reactive outcome that made the policy switch to the next link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackEvent<T, E> {
    /// A successful value matched a result predicate.
    Result(T),
    /// An error matched an error predicate.
    Error(ResilienceError<E>),
}

impl<T, E> FallbackEvent<T, E> {
    pub fn result(&self) -> Option<&T> {
        match self {
            Self::Result(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ResilienceError<E>> {
        match self {
            Self::Result(_) => None,
            Self::Error(error) => Some(error),
        }
    }
}

impl<T, E> From<Result<T, ResilienceError<E>>> for FallbackEvent<T, E> {
    fn from(outcome: Result<T, ResilienceError<E>>) -> Self {
        match outcome {
            Ok(value) => Self::Result(value),
            Err(error) => Self::Error(error),
        }
    }
}

struct FallbackConfig<T, E> {
    chain: Vec<Operation<T, E>>,
    reactions: Reactions<T, E>,
    on_fallback: Hooks<FallbackEvent<T, E>>,
    on_finally: Hooks<()>,
}

impl<T, E> Clone for FallbackConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            reactions: self.reactions.clone(),
            on_fallback: self.on_fallback.clone(),
            on_finally: self.on_finally.clone(),
        }
    }
}

impl<T, E> Default for FallbackConfig<T, E> {
    fn default() -> Self {
        Self {
            chain: Vec::new(),
            reactions: Reactions::default(),
            on_fallback: Hooks::default(),
            on_finally: Hooks::default(),
        }
    }
}

impl<T, E> FallbackConfig<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    async fn run(&self, primary: Operation<T, E>) -> Result<T, ResilienceError<E>> {
        let mut links = self.chain.iter().enumerate();
        let mut outcome = primary().await;
        loop {
            // an exhausted nested chain is final, whatever the predicates say
            if matches!(outcome, Err(ResilienceError::FallbackChainExhausted))
                || !self.reactions.is_reactive(&outcome).await
            {
                return outcome;
            }
            let Some((index, next)) = links.next() else {
                tracing::debug!(links = self.chain.len(), "Fallback chain exhausted");
                return Err(ResilienceError::FallbackChainExhausted);
            };
            tracing::debug!(link = index, "Falling back");
            self.on_fallback.run("on_fallback", &FallbackEvent::from(outcome)).await;
            outcome = next().await;
        }
    }
}

/// Substitutes alternative operations for reactive outcomes.
///
/// ```rust
/// use bulwark::prelude::*;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let fallback = FallbackPolicy::<&'static str, std::io::Error>::new();
/// fallback.react_on_error(|_| true).unwrap();
/// fallback.fallback(|| async { Ok("from cache") }).unwrap();
///
/// let value = fallback
///     .execute(|| async { Err(ResilienceError::BrokenCircuit) })
///     .await
///     .unwrap();
/// assert_eq!(value, "from cache");
/// # });
/// ```
pub struct FallbackPolicy<T, E> {
    core: Arc<PolicyCore<FallbackConfig<T, E>, T, E>>,
}

impl<T, E> Clone for FallbackPolicy<T, E> {
    fn clone(&self) -> Self {
        Self { core: self.core.clone() }
    }
}

impl<T, E> Default for FallbackPolicy<T, E> {
    fn default() -> Self {
        Self { core: Arc::new(PolicyCore::new(FallbackConfig::default())) }
    }
}

impl<T, E> std::fmt::Debug for FallbackPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackPolicy")
            .field("links", &self.core.config().config.chain.len())
            .field("executing", &self.core.executing())
            .finish()
    }
}

impl<T, E> FallbackPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a link to the fallback chain.
    pub fn fallback<F, Fut>(&self, link: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send + 'static,
    {
        let link = operation(link);
        self.core.configure(|c| c.chain.push(link))
    }

    /// Called with the triggering outcome each time the policy moves to the next link.
    pub fn on_fallback<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn(&FallbackEvent<T, E>) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.core.configure(move |c| c.on_fallback.push(hook))
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

impl<T, E> Policy<T, E> for FallbackPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E> {
        let core = self.core.clone();
        Box::pin(async move {
            let execution = core.enter();
            let primary = execution.delegate(operation);
            let config = &execution.config;

            let outcome = AssertUnwindSafe(config.run(primary)).catch_unwind().await;
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

impl<T, E> ReactivePolicy<T, E> for FallbackPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn add_reaction(&self, add: &dyn Fn(&mut Reactions<T, E>)) -> Result<(), ConfigError> {
        self.core.configure(|c| add(&mut c.reactions))
    }
}
