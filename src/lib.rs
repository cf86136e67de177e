#![forbid(unsafe_code)]

//! # Bulwark
//!
//! Composable resilience policies for async Rust: retry, circuit breaker, timeout, bulkhead
//! isolation, fallback and caching.
//!
//! ## Features
//!
//! - **Retry** with constant, linear, exponential or jittered backoff
//! - **Circuit breaker** with manual isolation and transition hooks
//! - **Timeout** racing the operation against a deadline
//! - **Bulkhead** concurrency limits with a bounded FIFO queue
//! - **Fallback** chains of substitute operations
//! - **Cache** with relative, sliding or absolute expiry
//! - **Composition** via [`Policy::wrap`] and [`PolicyCombination::combine`]
//! - **Tower** integration through [`PolicyLayer`]
//!
//! Every policy decides what it reacts to through predicates over results and errors, and
//! reports what it does through ordered hooks. Policies are cheap `Clone` handles; clones share
//! state, and a policy refuses reconfiguration while it is executing.
//!
//! ## Quick Start
//!
//! ```rust
//! use bulwark::prelude::*;
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Unavailable;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ConfigError> {
//!     let retry = RetryPolicy::<u32, Unavailable>::new();
//!     retry.retry_count(3)?;
//!     retry.wait_before_retry(Backoff::exponential(Duration::from_millis(10)))?;
//!     retry.react_on_error(|e| e.is_timeout() || e.is_inner())?;
//!
//!     let breaker = CircuitBreakerPolicy::<u32, Unavailable>::new();
//!     breaker.break_after(5)?;
//!     breaker.break_for(30_000)?;
//!     breaker.react_on_error(|e| e.is_inner())?;
//!
//!     let timeout = TimeoutPolicy::<u32, Unavailable>::new();
//!     timeout.timeout_after(1_000)?;
//!
//!     let pipeline =
//!         PolicyCombination::combine(vec![retry.shared(), breaker.shared(), timeout.shared()])?;
//!     let value = pipeline.execute_operation(operation(|| async { Ok(42) })).await;
//!     assert_eq!(value.ok(), Some(42));
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod bulkhead;
pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod combination;
pub mod error;
pub mod fallback;
pub mod hooks;
pub mod layer;
pub mod policy;
pub mod predicate;
pub mod prelude;
pub mod random;
pub mod retry;
mod settings;
pub mod sleeper;
pub mod timeout;

// Re-exports
pub use backoff::{Backoff, BackoffStrategy, MAX_BACKOFF};
pub use bulkhead::BulkheadPolicy;
pub use cache::{CachePolicy, TimeToLiveStrategy};
pub use circuit_breaker::{CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use combination::PolicyCombination;
pub use error::{ConfigError, ResilienceError};
pub use fallback::{FallbackEvent, FallbackPolicy};
pub use hooks::HookOutcome;
pub use layer::{PolicyLayer, PolicyService};
pub use policy::{operation, NopPolicy, Operation, OperationFuture, Policy};
pub use predicate::{Predicate, Predicates, ReactivePolicy, Reactions};
pub use random::{RandomGenerator, SeededRandom, ThreadRandom};
pub use retry::{RetryAttempt, RetryPolicy};
pub use settings::MAX_SAFE_INTEGER;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::TimeoutPolicy;
