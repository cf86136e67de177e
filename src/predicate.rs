//! Predicates deciding whether an outcome is *reactive*.
//!
//! Reactive policies (retry, circuit breaker, fallback) keep two ordered sets: one over
//! successful values and one over errors. An outcome is reactive when any predicate of the
//! matching set returns `true`; an empty set never reacts.

use crate::error::{ConfigError, ResilienceError};
use crate::policy::Policy;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// One predicate over `S`, synchronous or asynchronous.
pub enum Predicate<S> {
    Sync(Arc<dyn Fn(&S) -> bool + Send + Sync>),
    Async(Arc<dyn Fn(&S) -> BoxFuture<'static, bool> + Send + Sync>),
}

impl<S> Clone for Predicate<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(f.clone()),
            Self::Async(f) => Self::Async(f.clone()),
        }
    }
}

impl<S> std::fmt::Debug for Predicate<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync(_) => f.write_str("Predicate::Sync"),
            Self::Async(_) => f.write_str("Predicate::Async"),
        }
    }
}

impl<S> Predicate<S> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(&S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::Async(Arc::new(move |subject: &S| f(subject).boxed()))
    }

    /// Evaluate this predicate alone.
    pub async fn single(&self, subject: &S) -> bool {
        match self {
            Self::Sync(f) => f(subject),
            Self::Async(f) => f(subject).await,
        }
    }
}

/// Ordered predicate set.
pub struct Predicates<S> {
    entries: Vec<Predicate<S>>,
}

impl<S> Clone for Predicates<S> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone() }
    }
}

impl<S> Default for Predicates<S> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<S> std::fmt::Debug for Predicates<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.entries).finish()
    }
}

impl<S> Predicates<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, predicate: Predicate<S>) {
        self.entries.push(predicate);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if any predicate holds. Stops at the first `true`; empty set is `false`.
    pub async fn some(&self, subject: &S) -> bool {
        for predicate in &self.entries {
            if predicate.single(subject).await {
                return true;
            }
        }
        false
    }

    /// `true` if every predicate holds. Stops at the first `false`; empty set is `false`.
    pub async fn every(&self, subject: &S) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        for predicate in &self.entries {
            if !predicate.single(subject).await {
                return false;
            }
        }
        true
    }
}

/// The pair of predicate sets a reactive policy consults.
pub struct Reactions<T, E> {
    pub(crate) results: Predicates<T>,
    pub(crate) errors: Predicates<ResilienceError<E>>,
}

impl<T, E> Clone for Reactions<T, E> {
    fn clone(&self) -> Self {
        Self { results: self.results.clone(), errors: self.errors.clone() }
    }
}

impl<T, E> Default for Reactions<T, E> {
    fn default() -> Self {
        Self { results: Predicates::default(), errors: Predicates::default() }
    }
}

impl<T, E> Reactions<T, E> {
    pub(crate) async fn is_reactive(&self, outcome: &Result<T, ResilienceError<E>>) -> bool {
        match outcome {
            Ok(value) => self.results.some(value).await,
            Err(error) => self.errors.some(error).await,
        }
    }
}

/// Policies that react to selected outcomes: retry, circuit breaker and fallback.
pub trait ReactivePolicy<T, E>: Policy<T, E> {
    /// Register a predicate in this policy's reaction sets. Refused while executing.
    fn add_reaction(&self, add: &dyn Fn(&mut Reactions<T, E>)) -> Result<(), ConfigError>;

    fn react_on_result<F>(&self, predicate: F) -> Result<(), ConfigError>
    where
        Self: Sized,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Predicate::new(predicate);
        self.add_reaction(&|reactions| reactions.results.push(predicate.clone()))
    }

    fn react_on_result_async<F, Fut>(&self, predicate: F) -> Result<(), ConfigError>
    where
        Self: Sized,
        F: Fn(&T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let predicate = Predicate::new_async(predicate);
        self.add_reaction(&|reactions| reactions.results.push(predicate.clone()))
    }

    fn react_on_error<F>(&self, predicate: F) -> Result<(), ConfigError>
    where
        Self: Sized,
        F: Fn(&ResilienceError<E>) -> bool + Send + Sync + 'static,
    {
        let predicate = Predicate::new(predicate);
        self.add_reaction(&|reactions| reactions.errors.push(predicate.clone()))
    }

    fn react_on_error_async<F, Fut>(&self, predicate: F) -> Result<(), ConfigError>
    where
        Self: Sized,
        F: Fn(&ResilienceError<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let predicate = Predicate::new_async(predicate);
        self.add_reaction(&|reactions| reactions.errors.push(predicate.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn some_is_false_for_empty_set() {
        let predicates: Predicates<u32> = Predicates::new();
        assert!(!predicates.some(&1).await);
        assert!(!predicates.every(&1).await);
    }

    #[tokio::test]
    async fn some_short_circuits_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut predicates = Predicates::new();
        let c = calls.clone();
        predicates.push(Predicate::new(move |v: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
            *v > 5
        }));
        let c = calls.clone();
        predicates.push(Predicate::new_async(move |_: &u32| {
            c.fetch_add(10, Ordering::SeqCst);
            async { true }
        }));

        assert!(predicates.some(&9).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "second predicate must not run");

        assert!(predicates.some(&1).await);
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test]
    async fn every_requires_all() {
        let mut predicates = Predicates::new();
        predicates.push(Predicate::new(|v: &i32| *v > 0));
        predicates.push(Predicate::new_async(|v: &i32| {
            let even = *v % 2 == 0;
            async move { even }
        }));
        assert!(predicates.every(&4).await);
        assert!(!predicates.every(&3).await);
        assert!(!predicates.every(&-2).await);
    }

    #[tokio::test]
    async fn single_evaluates_async_predicates() {
        let predicate = Predicate::new_async(|s: &String| {
            let empty = s.is_empty();
            async move { empty }
        });
        assert!(predicate.single(&String::new()).await);
        assert!(!predicate.single(&"x".to_string()).await);
    }

    #[tokio::test]
    async fn reactions_dispatch_on_outcome() {
        let mut reactions: Reactions<u32, String> = Reactions::default();
        reactions.results.push(Predicate::new(|v: &u32| *v == 0));
        reactions.errors.push(Predicate::new(|e: &ResilienceError<String>| e.is_timeout()));

        assert!(reactions.is_reactive(&Ok(0)).await);
        assert!(!reactions.is_reactive(&Ok(1)).await);
        let timeout = ResilienceError::Timeout { timed_out_after: std::time::Duration::ZERO };
        assert!(reactions.is_reactive(&Err(timeout)).await);
        assert!(!reactions.is_reactive(&Err(ResilienceError::Inner("x".into()))).await);
    }
}
