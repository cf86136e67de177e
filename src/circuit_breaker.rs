//! Circuit breaker policy
//!
//! State machine (target ← allowed sources):
//!
//! - `Open` ← `Closed`, `AttemptingClose`
//! - `AttemptingClose` ← `Open`
//! - `Closed` ← `AttemptingClose`, `Isolated`
//! - `Isolated` ← `Closed`, `Open`, `AttemptingClose`
//!
//! The current state is mirrored in an atomic so [`CircuitBreakerPolicy::state`] never blocks.
//! Every decide-then-mutate step (including the transition hooks) runs under one async mutex per
//! breaker; the protected operation itself runs outside it. Transition hooks must not call
//! `isolate`/`reset` on the breaker that is invoking them.

use crate::clock::{Clock, MonotonicClock};
use crate::error::{ConfigError, ResilienceError};
use crate::hooks::{HookOutcome, Hooks};
use crate::policy::{Operation, OperationFuture, Policy, PolicyCore};
use crate::predicate::{ReactivePolicy, Reactions};
use crate::settings::{count_to_u64, positive};
use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_ATTEMPTING_CLOSE: u8 = 2;
const STATE_ISOLATED: u8 = 3;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Normal operation; reactive outcomes are counted.
    Closed,
    /// Calls fail fast with [`ResilienceError::BrokenCircuit`] until the break elapses.
    Open,
    /// The next outcome decides between `Closed` and `Open`.
    AttemptingClose,
    /// Manually held open until [`CircuitBreakerPolicy::reset`].
    Isolated,
}

impl CircuitState {
    fn to_u8(self) -> u8 {
        match self {
            CircuitState::Closed => STATE_CLOSED,
            CircuitState::Open => STATE_OPEN,
            CircuitState::AttemptingClose => STATE_ATTEMPTING_CLOSE,
            CircuitState::Isolated => STATE_ISOLATED,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_ATTEMPTING_CLOSE => CircuitState::AttemptingClose,
            STATE_ISOLATED => CircuitState::Isolated,
            _ => CircuitState::Closed,
        }
    }

    /// Whether the state machine has an edge from `self` to `to`.
    pub fn can_transition_to(self, to: CircuitState) -> bool {
        use CircuitState::*;
        matches!(
            (self, to),
            (Closed | AttemptingClose, Open)
                | (Open, AttemptingClose)
                | (AttemptingClose | Isolated, Closed)
                | (Closed | Open | AttemptingClose, Isolated)
        )
    }
}

struct BreakerConfig<T, E> {
    break_after: usize,
    break_for: Duration,
    reactions: Reactions<T, E>,
    on_open: Hooks<()>,
    on_close: Hooks<()>,
    on_attempting_close: Hooks<()>,
    on_isolate: Hooks<()>,
}

impl<T, E> Clone for BreakerConfig<T, E> {
    fn clone(&self) -> Self {
        Self {
            break_after: self.break_after,
            break_for: self.break_for,
            reactions: self.reactions.clone(),
            on_open: self.on_open.clone(),
            on_close: self.on_close.clone(),
            on_attempting_close: self.on_attempting_close.clone(),
            on_isolate: self.on_isolate.clone(),
        }
    }
}

impl<T, E> Default for BreakerConfig<T, E> {
    fn default() -> Self {
        Self {
            break_after: 1,
            break_for: Duration::from_millis(1000),
            reactions: Reactions::default(),
            on_open: Hooks::default(),
            on_close: Hooks::default(),
            on_attempting_close: Hooks::default(),
            on_isolate: Hooks::default(),
        }
    }
}

impl<T, E> BreakerConfig<T, E> {
    fn hooks_for(&self, state: CircuitState) -> (&'static str, &Hooks<()>) {
        match state {
            CircuitState::Closed => ("on_close", &self.on_close),
            CircuitState::Open => ("on_open", &self.on_open),
            CircuitState::AttemptingClose => ("on_attempting_close", &self.on_attempting_close),
            CircuitState::Isolated => ("on_isolate", &self.on_isolate),
        }
    }
}

/// Mutable bookkeeping guarded by the transition lock.
struct CircuitCell {
    last_transition_millis: u64,
}

struct BreakerShared<T, E> {
    core: PolicyCore<BreakerConfig<T, E>, T, E>,
    state: AtomicU8,
    consecutive: AtomicUsize,
    cell: tokio::sync::Mutex<CircuitCell>,
    clock: Arc<dyn Clock>,
}

impl<T, E> BreakerShared<T, E> {
    fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run the target state's hooks, then publish it. Caller holds the cell lock.
    async fn transition(
        &self,
        cell: &mut CircuitCell,
        config: &BreakerConfig<T, E>,
        to: CircuitState,
    ) {
        let from = self.state();
        assert!(from.can_transition_to(to), "illegal circuit transition {from:?} -> {to:?}");

        let (kind, hooks) = config.hooks_for(to);
        hooks.fire(kind).await;

        cell.last_transition_millis = self.clock.now_millis();
        if to == CircuitState::Closed {
            self.consecutive.store(0, Ordering::Release);
        }
        self.state.store(to.to_u8(), Ordering::Release);
        tracing::info!(?from, ?to, "Circuit breaker transition");
    }
}

/// Stops calling a failing dependency for a while after repeated reactive outcomes.
///
/// ```rust
/// use bulwark::prelude::*;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let breaker = CircuitBreakerPolicy::<u32, std::io::Error>::new();
/// breaker.break_after(2).unwrap();
/// breaker.break_for(30_000).unwrap();
/// breaker.react_on_error(|e| e.is_inner()).unwrap();
///
/// for _ in 0..2 {
///     let _ = breaker
///         .execute(|| async { Err(ResilienceError::Inner(std::io::Error::new(std::io::ErrorKind::Other, "down"))) })
///         .await;
/// }
/// assert_eq!(breaker.state(), CircuitState::Open);
/// let err = breaker.execute(|| async { Ok(1) }).await.unwrap_err();
/// assert!(err.is_broken_circuit());
/// # });
/// ```
pub struct CircuitBreakerPolicy<T, E> {
    shared: Arc<BreakerShared<T, E>>,
}

impl<T, E> Clone for CircuitBreakerPolicy<T, E> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T, E> Default for CircuitBreakerPolicy<T, E> {
    fn default() -> Self {
        Self::with_clock(MonotonicClock::default())
    }
}

impl<T, E> std::fmt::Debug for CircuitBreakerPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerPolicy")
            .field("state", &self.state())
            .field("consecutive_reactions", &self.consecutive_reactions())
            .field("executing", &self.shared.core.executing())
            .finish()
    }
}

impl<T, E> CircuitBreakerPolicy<T, E> {
    /// Closed breaker on a monotonic clock; opens after 1 reaction for 1000 ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Closed breaker measuring break durations on `clock`.
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        let now = clock.now_millis();
        Self {
            shared: Arc::new(BreakerShared {
                core: PolicyCore::new(BreakerConfig::default()),
                state: AtomicU8::new(STATE_CLOSED),
                consecutive: AtomicUsize::new(0),
                cell: tokio::sync::Mutex::new(CircuitCell { last_transition_millis: now }),
                clock: Arc::new(clock),
            }),
        }
    }

    /// Open after `threshold` consecutive reactive outcomes.
    pub fn break_after(&self, threshold: usize) -> Result<(), ConfigError> {
        positive("break_after", count_to_u64(threshold))?;
        self.shared.core.configure(|c| c.break_after = threshold)
    }

    /// Stay open for `millis` milliseconds before attempting to close.
    pub fn break_for(&self, millis: u64) -> Result<(), ConfigError> {
        let millis = positive("break_for", millis)?;
        self.shared.core.configure(|c| c.break_for = Duration::from_millis(millis))
    }

    /// Called when the circuit opens.
    ///
    /// Transition hooks run while the breaker holds its transition lock. A hook must not call
    /// `execute`, `isolate` or `reset` on the same breaker, or the transition never completes.
    pub fn on_open<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.shared.core.configure(move |c| c.on_open.push_unit(hook))
    }

    /// Called when the circuit closes.
    ///
    /// Transition hooks run while the breaker holds its transition lock. A hook must not call
    /// `execute`, `isolate` or `reset` on the same breaker, or the transition never completes.
    pub fn on_close<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.shared.core.configure(move |c| c.on_close.push_unit(hook))
    }

    /// Called when the break has elapsed and the circuit lets a probe through.
    ///
    /// Transition hooks run while the breaker holds its transition lock. A hook must not call
    /// `execute`, `isolate` or `reset` on the same breaker, or the transition never completes.
    pub fn on_attempting_close<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.shared.core.configure(move |c| c.on_attempting_close.push_unit(hook))
    }

    /// Called when the circuit is isolated manually.
    ///
    /// Transition hooks run while the breaker holds its transition lock. A hook must not call
    /// `execute`, `isolate` or `reset` on the same breaker, or the transition never completes.
    pub fn on_isolate<F, Fut>(&self, hook: F) -> Result<(), ConfigError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.shared.core.configure(move |c| c.on_isolate.push_unit(hook))
    }

    /// Current state. Lock-free.
    pub fn state(&self) -> CircuitState {
        self.shared.state()
    }

    /// Reactive outcomes seen in a row while closed.
    pub fn consecutive_reactions(&self) -> usize {
        self.shared.consecutive.load(Ordering::Acquire)
    }

    /// Hold the circuit open until [`reset`](Self::reset). Fails if already isolated.
    pub async fn isolate(&self) -> Result<(), ConfigError> {
        let config = self.shared.core.config();
        let mut cell = self.shared.cell.lock().await;
        let from = self.shared.state();
        if !from.can_transition_to(CircuitState::Isolated) {
            return Err(ConfigError::InvalidTransition { from, to: CircuitState::Isolated });
        }
        tracing::info!(?from, "Circuit breaker isolated manually");
        self.shared.transition(&mut cell, &config.config, CircuitState::Isolated).await;
        Ok(())
    }

    /// Close an isolated circuit. Fails unless the circuit is isolated.
    pub async fn reset(&self) -> Result<(), ConfigError> {
        let config = self.shared.core.config();
        let mut cell = self.shared.cell.lock().await;
        let state = self.shared.state();
        if state != CircuitState::Isolated {
            return Err(ConfigError::NotIsolated { state });
        }
        tracing::info!("Circuit breaker reset manually");
        self.shared.transition(&mut cell, &config.config, CircuitState::Closed).await;
        Ok(())
    }
}

impl<T, E> Policy<T, E> for CircuitBreakerPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E> {
        let shared = self.shared.clone();
        Box::pin(async move {
            let execution = shared.core.enter();
            let config = &execution.config;

            {
                let mut cell = shared.cell.lock().await;
                if shared.state() == CircuitState::Open {
                    let now = shared.clock.now_millis();
                    let break_for =
                        u64::try_from(config.break_for.as_millis()).unwrap_or(u64::MAX);
                    if now >= cell.last_transition_millis.saturating_add(break_for) {
                        shared.transition(&mut cell, config, CircuitState::AttemptingClose).await;
                    }
                }
                match shared.state() {
                    CircuitState::Open => {
                        tracing::debug!("Circuit breaker open; failing fast");
                        return Err(ResilienceError::BrokenCircuit);
                    }
                    CircuitState::Isolated => return Err(ResilienceError::IsolatedCircuit),
                    CircuitState::Closed | CircuitState::AttemptingClose => {}
                }
            }

            let operation = execution.delegate(operation);
            let outcome = operation().await;
            let reactive = config.reactions.is_reactive(&outcome).await;

            let mut cell = shared.cell.lock().await;
            match (shared.state(), reactive) {
                (CircuitState::AttemptingClose, false) => {
                    shared.consecutive.store(0, Ordering::Release);
                    shared.transition(&mut cell, config, CircuitState::Closed).await;
                }
                (_, false) => shared.consecutive.store(0, Ordering::Release),
                (CircuitState::AttemptingClose, true) => {
                    shared.transition(&mut cell, config, CircuitState::Open).await;
                }
                (CircuitState::Closed, true) => {
                    let reactions = shared.consecutive.fetch_add(1, Ordering::AcqRel) + 1;
                    if reactions >= config.break_after {
                        tracing::warn!(
                            reactions,
                            threshold = config.break_after,
                            "Circuit breaker threshold reached"
                        );
                        shared.transition(&mut cell, config, CircuitState::Open).await;
                    }
                }
                // isolated or reopened by someone else while the operation ran
                (CircuitState::Open | CircuitState::Isolated, true) => {}
            }
            drop(cell);
            outcome
        })
    }

    fn wrap(&self, inner: Arc<dyn Policy<T, E>>) -> Result<(), ConfigError> {
        self.shared.core.wrap(inner)
    }

    fn executing(&self) -> usize {
        self.shared.core.executing()
    }
}

impl<T, E> ReactivePolicy<T, E> for CircuitBreakerPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn add_reaction(&self, add: &dyn Fn(&mut Reactions<T, E>)) -> Result<(), ConfigError> {
        self.shared.core.configure(|c| add(&mut c.reactions))
    }
}
