//! Convenient re-exports for common Bulwark types.
pub use crate::{
    backoff::{Backoff, BackoffStrategy, MAX_BACKOFF},
    bulkhead::BulkheadPolicy,
    cache::{CachePolicy, TimeToLiveStrategy},
    circuit_breaker::{CircuitBreakerPolicy, CircuitState},
    clock::{Clock, ManualClock, MonotonicClock, SystemClock},
    combination::PolicyCombination,
    error::{ConfigError, ResilienceError},
    fallback::{FallbackEvent, FallbackPolicy},
    layer::{PolicyLayer, PolicyService},
    policy::{operation, NopPolicy, Operation, Policy},
    predicate::ReactivePolicy,
    random::{RandomGenerator, SeededRandom, ThreadRandom},
    retry::{RetryAttempt, RetryPolicy},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    timeout::TimeoutPolicy,
};
