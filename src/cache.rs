//! Cache policy
//!
//! Holds a single value. While the entry is valid, executions return a clone of it without
//! running the operation; otherwise the operation runs and a successful value replaces the
//! entry. Errors are propagated and never cached.
//!
//! Expiry strategies:
//! - [`TimeToLiveStrategy::Relative`]: valid for `ttl` ms after being stored.
//! - [`TimeToLiveStrategy::Sliding`]: like relative, but every hit pushes expiry to `now + ttl`.
//! - [`TimeToLiveStrategy::Absolute`]: valid until the given epoch timestamp (ms).

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::hooks::{HookOutcome, Hooks};
use crate::policy::{Operation, OperationFuture, Policy, PolicyCore};
use crate::settings::positive;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// How a stored value's expiry is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeToLiveStrategy {
    Relative,
    Sliding,
    Absolute,
}

#[derive(Clone, Default)]
struct CacheConfig {
    ttl: TimeToLive,
    on_cache_get: Hooks<()>,
    on_cache_miss: Hooks<()>,
    on_cache_put: Hooks<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimeToLive {
    strategy: TimeToLiveStrategy,
    value: u64,
}

impl Default for TimeToLive {
    fn default() -> Self {
        Self { strategy: TimeToLiveStrategy::Relative, value: 1000 }
    }
}

impl TimeToLive {
    fn valid_until(&self, now: u64) -> u64 {
        match self.strategy {
            TimeToLiveStrategy::Relative | TimeToLiveStrategy::Sliding => {
                now.saturating_add(self.value)
            }
            TimeToLiveStrategy::Absolute => self.value,
        }
    }
}

struct CacheEntry<T> {
    value: T,
    valid_until: u64,
}

struct CacheShared<T, E> {
    core: PolicyCore<CacheConfig, T, E>,
    entry: Mutex<Option<CacheEntry<T>>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone, E> CacheShared<T, E> {
    fn entry(&self) -> MutexGuard<'_, Option<CacheEntry<T>>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The cached value if still valid; sliding entries are extended on the way out.
    fn lookup(&self, ttl: &TimeToLive) -> Option<T> {
        let now = self.clock.now_millis();
        let mut entry = self.entry();
        let cached = entry.as_mut().filter(|cached| now < cached.valid_until)?;
        if ttl.strategy == TimeToLiveStrategy::Sliding {
            cached.valid_until = ttl.valid_until(now);
        }
        Some(cached.value.clone())
    }

    fn store(&self, ttl: &TimeToLive, value: T) {
        let valid_until = ttl.valid_until(self.clock.now_millis());
        *self.entry() = Some(CacheEntry { value, valid_until });
    }
}

/// Single-entry result cache with configurable expiry.
///
/// Defaults: relative TTL of 1000 ms on the system wall clock.
pub struct CachePolicy<T, E> {
    shared: Arc<CacheShared<T, E>>,
}

impl<T, E> Clone for CachePolicy<T, E> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T, E> Default for CachePolicy<T, E> {
    fn default() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<T, E> std::fmt::Debug for CachePolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy")
            .field("time_to_live", &self.shared.core.config().config.ttl)
            .field("executing", &self.shared.core.executing())
            .finish()
    }
}

impl<T, E> CachePolicy<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache measuring expiry on `clock` (milliseconds since the Unix epoch for absolute TTLs).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                core: PolicyCore::new(CacheConfig::default()),
                entry: Mutex::new(None),
                clock: Arc::new(clock),
            }),
        }
    }

    /// Set the expiry strategy. `value` is a duration in ms, or an epoch timestamp in ms for
    /// [`TimeToLiveStrategy::Absolute`].
    pub fn time_to_live(
        &self,
        strategy: TimeToLiveStrategy,
        value: u64,
    ) -> Result<(), ConfigError> {
        let value = positive("time_to_live", value)?;
        self.shared.core.configure(|c| c.ttl = TimeToLive { strategy, value })
    }

    /// Called on every hit.
    pub fn on_cache_get<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.shared.core.configure(move |c| c.on_cache_get.push_unit(hook))
    }

    /// Called on every miss, before the operation runs.
    pub fn on_cache_miss<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.shared.core.configure(move |c| c.on_cache_miss.push_unit(hook))
    }

    /// Called after a fresh value has been stored.
    pub fn on_cache_put<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.shared.core.configure(move |c| c.on_cache_put.push_unit(hook))
    }

    /// Drop the cached value so the next execution runs the operation.
    pub fn invalidate(&self) {
        *self.shared.entry.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<T, E> Policy<T, E> for CachePolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E> {
        let shared = self.shared.clone();
        Box::pin(async move {
            let execution = shared.core.enter();
            let config = &execution.config;

            if let Some(value) = shared.lookup(&config.ttl) {
                config.on_cache_get.fire("on_cache_get").await;
                return Ok(value);
            }

            tracing::debug!("Cache miss");
            config.on_cache_miss.fire("on_cache_miss").await;
            let operation = execution.delegate(operation);
            let value = operation().await?;
            shared.store(&config.ttl, value.clone());
            config.on_cache_put.fire("on_cache_put").await;
            Ok(value)
        })
    }

    fn wrap(&self, inner: Arc<dyn Policy<T, E>>) -> Result<(), ConfigError> {
        self.shared.core.wrap(inner)
    }

    fn executing(&self) -> usize {
        self.shared.core.executing()
    }
}
