//! Error types for resilience policies
use std::fmt;
use std::time::Duration;

use crate::circuit_breaker::CircuitState;

/// Unified error type returned by every policy's `execute`.
///
/// Policy-native refusals (timeout, broken/isolated circuit, bulkhead rejection, exhausted
/// fallback chain) are distinct variants; whatever the protected operation fails with travels
/// in [`ResilienceError::Inner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResilienceError<E> {
    /// A timeout policy gave up waiting for the operation.
    Timeout { timed_out_after: Duration },
    /// The circuit breaker is open and fails fast.
    BrokenCircuit,
    /// The circuit breaker has been manually isolated.
    IsolatedCircuit,
    /// The bulkhead compartment and its queue are both full.
    BulkheadRejected { in_flight: usize, max: usize },
    /// Every link of the fallback chain produced a reactive outcome.
    FallbackChainExhausted,
    /// The underlying operation failed
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { timed_out_after } => {
                write!(f, "operation timed out after {:?}", timed_out_after)
            }
            Self::BrokenCircuit => write!(f, "circuit is open"),
            Self::IsolatedCircuit => write!(f, "circuit is isolated"),
            Self::BulkheadRejected { in_flight, max } => write!(
                f,
                "bulkhead compartment rejected the execution ({} in-flight, max {})",
                in_flight, max
            ),
            Self::FallbackChainExhausted => write!(f, "fallback chain exhausted"),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Check if this error is a timeout raised by a timeout policy
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error comes from an open circuit
    pub fn is_broken_circuit(&self) -> bool {
        matches!(self, Self::BrokenCircuit)
    }

    /// Check if this error comes from an isolated circuit
    pub fn is_isolated_circuit(&self) -> bool {
        matches!(self, Self::IsolatedCircuit)
    }

    /// Check if this error is due to bulkhead rejection
    pub fn is_bulkhead_rejected(&self) -> bool {
        matches!(self, Self::BulkheadRejected { .. })
    }

    /// Check if the fallback chain ran out of links
    pub fn is_fallback_chain_exhausted(&self) -> bool {
        matches!(self, Self::FallbackChainExhausted)
    }

    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Duration after which a timeout policy gave up, if this is a timeout.
    pub fn timed_out_after(&self) -> Option<Duration> {
        match self {
            Self::Timeout { timed_out_after } => Some(*timed_out_after),
            _ => None,
        }
    }

    /// Access bulkhead capacity info as (in_flight, max).
    pub fn bulkhead_capacity(&self) -> Option<(usize, usize)> {
        match self {
            Self::BulkheadRejected { in_flight, max } => Some((*in_flight, *max)),
            _ => None,
        }
    }
}

/// Synchronous configuration and command errors.
///
/// These are raised by setters, `wrap`, manual circuit commands and combination; they never
/// come out of `execute` and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A numeric argument is out of range.
    #[error("{name} {reason}")]
    InvalidArgument { name: &'static str, reason: &'static str },
    /// The policy is executing and cannot be reconfigured.
    #[error("cannot modify policy during execution")]
    ModificationNotAllowed,
    /// A circuit transition that the state machine does not allow.
    #[error("invalid circuit transition from {from:?} to {to:?}")]
    InvalidTransition { from: CircuitState, to: CircuitState },
    /// `reset` called on a circuit that is not isolated.
    #[error("cannot reset if not in Isolated state (current: {state:?})")]
    NotIsolated { state: CircuitState },
    /// `PolicyCombination::combine` needs at least two policies.
    #[error("combine requires at least 2 policies (got {0})")]
    NotEnoughPolicies(usize),
    /// Backoff parameters are inconsistent.
    #[error("invalid backoff: {0}")]
    InvalidBackoff(&'static str),
}
