//! Backoff strategies for retry policies.
//!
//! Retry counts are 1-based: `delay(1)` is the wait before the first retry. `delay(0)` is the
//! initial call and always zero. With [`Backoff::fast_first`] the first retry happens
//! immediately and the rest of the curve shifts one step to the right.
//!
//! ```rust
//! use std::time::Duration;
//! use bulwark::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay(6), Duration::from_secs(2)); // capped
//!
//! let eager = Backoff::linear(Duration::from_millis(50)).fast_first();
//! assert_eq!(eager.delay(1), Duration::ZERO);
//! assert_eq!(eager.delay(3), Duration::from_millis(100));
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`].

use crate::error::ConfigError;
use crate::random::{RandomGenerator, ThreadRandom};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Anything that maps a retry count to a wait.
pub trait BackoffStrategy: Send + Sync {
    fn delay(&self, retry_count: usize) -> Duration;
}

impl<F> BackoffStrategy for F
where
    F: Fn(usize) -> Duration + Send + Sync,
{
    fn delay(&self, retry_count: usize) -> Duration {
        self(retry_count)
    }
}

#[derive(Clone)]
enum BackoffKind {
    Constant { delay: Duration },
    Linear { step: Duration, max: Option<Duration> },
    Exponential { initial: Duration, base: u32, max: Option<Duration> },
    Jittered { min: Duration, max: Duration, random: Arc<dyn RandomGenerator> },
}

impl fmt::Debug for BackoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant { delay } => f.debug_struct("Constant").field("delay", delay).finish(),
            Self::Linear { step, max } => {
                f.debug_struct("Linear").field("step", step).field("max", max).finish()
            }
            Self::Exponential { initial, base, max } => f
                .debug_struct("Exponential")
                .field("initial", initial)
                .field("base", base)
                .field("max", max)
                .finish(),
            Self::Jittered { min, max, random } => f
                .debug_struct("Jittered")
                .field("min", min)
                .field("max", max)
                .field("random", random)
                .finish(),
        }
    }
}

/// Built-in backoff curves.
#[derive(Debug, Clone)]
pub struct Backoff {
    kind: BackoffKind,
    fast_first: bool,
}

impl Backoff {
    /// The same `delay` before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self::from_kind(BackoffKind::Constant { delay })
    }

    /// `step * n` before retry `n`.
    pub fn linear(step: Duration) -> Self {
        Self::from_kind(BackoffKind::Linear { step, max: None })
    }

    /// `initial * 2^(n-1)` before retry `n`.
    pub fn exponential(initial: Duration) -> Self {
        Self::exponential_with_base(initial, 2)
    }

    /// `initial * base^(n-1)` before retry `n`.
    pub fn exponential_with_base(initial: Duration, base: u32) -> Self {
        Self::from_kind(BackoffKind::Exponential { initial, base, max: None })
    }

    /// A uniformly random whole number of milliseconds in `[min, max]` before every retry.
    ///
    /// Draws from [`ThreadRandom`]; use [`Backoff::with_random`] to inject a generator.
    pub fn jittered(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvalidBackoff("jitter min must not exceed max"));
        }
        Ok(Self::from_kind(BackoffKind::Jittered { min, max, random: Arc::new(ThreadRandom) }))
    }

    fn from_kind(kind: BackoffKind) -> Self {
        Self { kind, fast_first: false }
    }

    /// Retry immediately the first time, then follow the curve shifted by one.
    pub fn fast_first(mut self) -> Self {
        self.fast_first = true;
        self
    }

    /// Cap a linear or exponential curve. `max` must be positive and not below the first step.
    pub fn with_max(mut self, cap: Duration) -> Result<Self, ConfigError> {
        if cap.is_zero() {
            return Err(ConfigError::InvalidBackoff("max must be greater than zero"));
        }
        match &mut self.kind {
            BackoffKind::Linear { step: first, max }
            | BackoffKind::Exponential { initial: first, max, .. } => {
                if cap < *first {
                    return Err(ConfigError::InvalidBackoff("max must not be below the base delay"));
                }
                *max = Some(cap);
                Ok(self)
            }
            BackoffKind::Constant { .. } | BackoffKind::Jittered { .. } => {
                Err(ConfigError::InvalidBackoff("with_max is only valid for linear or exponential"))
            }
        }
    }

    /// Replace the random source of a jittered backoff. No effect on other curves.
    pub fn with_random(mut self, generator: Arc<dyn RandomGenerator>) -> Self {
        if let BackoffKind::Jittered { random, .. } = &mut self.kind {
            *random = generator;
        }
        self
    }

    /// Wait before retry number `retry_count` (1-based; 0 is the initial call).
    pub fn delay(&self, retry_count: usize) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let step = if self.fast_first {
            if retry_count == 1 {
                return Duration::ZERO;
            }
            retry_count - 1
        } else {
            retry_count
        };
        match &self.kind {
            BackoffKind::Constant { delay } => (*delay).min(MAX_BACKOFF),
            BackoffKind::Linear { step: unit, max } => {
                let factor = u32::try_from(step).unwrap_or(u32::MAX);
                let linear = unit.checked_mul(factor).unwrap_or(MAX_BACKOFF);
                capped(linear, *max)
            }
            BackoffKind::Exponential { initial, base, max } => {
                let exponent = u32::try_from(step - 1).unwrap_or(u32::MAX);
                let multiplier = u128::from(*base).saturating_pow(exponent);
                let nanos =
                    initial.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                let exp = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
                capped(exp, *max)
            }
            BackoffKind::Jittered { min, max, random } => {
                let low = millis(*min);
                let high = millis(*max);
                Duration::from_millis(random.integer(low, high)).min(MAX_BACKOFF)
            }
        }
    }
}

fn capped(delay: Duration, max: Option<Duration>) -> Duration {
    max.map(|m| delay.min(m)).unwrap_or(delay).min(MAX_BACKOFF)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl BackoffStrategy for Backoff {
    fn delay(&self, retry_count: usize) -> Duration {
        Backoff::delay(self, retry_count)
    }
}
