//! Copy-on-write configuration cells shared by every policy.
//!
//! Readers take cheap `ArcSwap` snapshots; writers are serialized through a small lock and are
//! refused while the owning policy has executions in flight. An execution keeps the snapshot it
//! was admitted with, so it can never observe a half-applied reconfiguration.

use crate::error::ConfigError;
use arc_swap::ArcSwap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Largest value accepted by numeric setters (2^53 - 1).
///
/// Values above this cannot be represented exactly as `f64` milliseconds, which is what most
/// timer backends and telemetry consumers end up using.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

pub(crate) struct Settings<C> {
    current: ArcSwap<C>,
    writer: Mutex<()>,
    executing: AtomicUsize,
}

impl<C: Clone> Settings<C> {
    pub(crate) fn new(value: C) -> Self {
        Self {
            current: ArcSwap::from_pointee(value),
            writer: Mutex::new(()),
            executing: AtomicUsize::new(0),
        }
    }

    /// Snapshot the current value (cheap clone of Arc).
    pub(crate) fn snapshot(&self) -> Arc<C> {
        self.current.load_full()
    }

    /// Apply `f` to a copy of the configuration and publish it, unless executing.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R, ConfigError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if self.executing.load(Ordering::Acquire) > 0 {
            return Err(ConfigError::ModificationNotAllowed);
        }
        let mut next = C::clone(&self.current.load());
        let out = f(&mut next);
        self.current.store(Arc::new(next));
        Ok(out)
    }

    /// Register an execution and hand back the configuration it runs with.
    pub(crate) fn enter(&self) -> Execution<'_, C> {
        self.executing.fetch_add(1, Ordering::AcqRel);
        Execution { snapshot: self.snapshot(), executing: &self.executing }
    }

    pub(crate) fn executing(&self) -> usize {
        self.executing.load(Ordering::Acquire)
    }
}

/// Execution-depth guard; the depth is released on drop, including unwinds and cancellation.
pub(crate) struct Execution<'a, C> {
    snapshot: Arc<C>,
    executing: &'a AtomicUsize,
}

impl<C> Deref for Execution<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.snapshot
    }
}

impl<C> Drop for Execution<'_, C> {
    fn drop(&mut self) {
        self.executing.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Validate a setter argument that must be `> 0`.
pub(crate) fn positive(name: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidArgument { name, reason: "must be greater than 0" });
    }
    at_most_safe(name, value)
}

/// Validate a setter argument that must be `>= 0` (always true for unsigned input).
pub(crate) fn non_negative(name: &'static str, value: u64) -> Result<u64, ConfigError> {
    at_most_safe(name, value)
}

fn at_most_safe(name: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value > MAX_SAFE_INTEGER {
        return Err(ConfigError::InvalidArgument {
            name,
            reason: "must be less than or equal to 2^53 - 1",
        });
    }
    Ok(value)
}

pub(crate) fn count_to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
