//! Bulkhead isolation policy
//!
//! Caps how many executions run at once and how many may wait for a slot. Waiters are served
//! FIFO; a finishing execution hands its slot straight to the head waiter instead of freeing
//! it, so a newcomer can never overtake the queue and `in_flight` never exceeds the size.

use crate::error::{ConfigError, ResilienceError};
use crate::policy::{Operation, OperationFuture, Policy, PolicyCore};
use crate::settings::{count_to_u64, non_negative, positive};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
struct BulkheadConfig {
    max_concurrency: usize,
    max_queued: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrency: usize::MAX, max_queued: 0 }
    }
}

struct Waiter {
    id: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct Compartment {
    in_flight: usize,
    queue: VecDeque<Waiter>,
    next_id: u64,
}

enum Admission {
    Admitted,
    Queued { id: u64, granted: oneshot::Receiver<()> },
    Rejected { in_flight: usize },
}

struct BulkheadShared<T, E> {
    core: PolicyCore<BulkheadConfig, T, E>,
    compartment: Mutex<Compartment>,
}

impl<T, E> BulkheadShared<T, E> {
    fn compartment(&self) -> MutexGuard<'_, Compartment> {
        self.compartment.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, config: &BulkheadConfig) -> Admission {
        let mut compartment = self.compartment();
        if compartment.in_flight < config.max_concurrency {
            compartment.in_flight += 1;
            return Admission::Admitted;
        }
        if compartment.queue.len() < config.max_queued {
            let id = compartment.next_id;
            compartment.next_id = compartment.next_id.wrapping_add(1);
            let (grant, granted) = oneshot::channel();
            compartment.queue.push_back(Waiter { id, grant });
            return Admission::Queued { id, granted };
        }
        Admission::Rejected { in_flight: compartment.in_flight }
    }

    /// Give a finished slot to the next live waiter, or free it.
    fn release(&self) {
        let mut compartment = self.compartment();
        while let Some(waiter) = compartment.queue.pop_front() {
            if waiter.grant.send(()).is_ok() {
                return;
            }
        }
        compartment.in_flight = compartment.in_flight.saturating_sub(1);
    }
}

/// Releases the slot on drop, including unwinds and cancellation.
struct Slot<'a, T, E> {
    shared: &'a BulkheadShared<T, E>,
}

impl<T, E> Drop for Slot<'_, T, E> {
    fn drop(&mut self) {
        self.shared.release();
    }
}

/// A queued waiter. Dropped before being served, it leaves the queue; dropped after being
/// granted a slot it never used, it passes the slot on.
struct Ticket<'a, T, E> {
    shared: &'a BulkheadShared<T, E>,
    id: u64,
    armed: bool,
}

impl<T, E> Drop for Ticket<'_, T, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut compartment = self.shared.compartment();
        let before = compartment.queue.len();
        compartment.queue.retain(|waiter| waiter.id != self.id);
        let still_queued = compartment.queue.len() != before;
        drop(compartment);
        if !still_queued {
            self.shared.release();
        }
    }
}

/// Limits concurrent executions, with an optional bounded waiting queue.
///
/// Defaults: unbounded concurrency, no queue.
pub struct BulkheadPolicy<T, E> {
    shared: Arc<BulkheadShared<T, E>>,
}

impl<T, E> Clone for BulkheadPolicy<T, E> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T, E> Default for BulkheadPolicy<T, E> {
    fn default() -> Self {
        Self {
            shared: Arc::new(BulkheadShared {
                core: PolicyCore::new(BulkheadConfig::default()),
                compartment: Mutex::new(Compartment::default()),
            }),
        }
    }
}

impl<T, E> std::fmt::Debug for BulkheadPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkheadPolicy")
            .field("available_slots", &self.available_slots_count())
            .field("available_queued_actions", &self.available_queued_actions_count())
            .finish()
    }
}

impl<T, E> BulkheadPolicy<T, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of executions running at once.
    pub fn max_concurrency(&self, size: usize) -> Result<(), ConfigError> {
        positive("max_concurrency", count_to_u64(size))?;
        self.shared.core.configure(|c| c.max_concurrency = size)
    }

    /// Maximum number of executions waiting for a slot; `0` disables queueing.
    pub fn max_queued_actions(&self, capacity: usize) -> Result<(), ConfigError> {
        non_negative("max_queued_actions", count_to_u64(capacity))?;
        self.shared.core.configure(|c| c.max_queued = capacity)
    }

    /// Slots not currently taken.
    pub fn available_slots_count(&self) -> usize {
        let size = self.shared.core.config().config.max_concurrency;
        size.saturating_sub(self.shared.compartment().in_flight)
    }

    /// Queue places not currently taken.
    pub fn available_queued_actions_count(&self) -> usize {
        let capacity = self.shared.core.config().config.max_queued;
        capacity.saturating_sub(self.shared.compartment().queue.len())
    }
}

impl<T, E> Policy<T, E> for BulkheadPolicy<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn execute_operation(&self, operation: Operation<T, E>) -> OperationFuture<T, E> {
        let shared = self.shared.clone();
        Box::pin(async move {
            let execution = shared.core.enter();
            let config = &execution.config;

            let _slot = match shared.admit(config) {
                Admission::Admitted => Slot { shared: &shared },
                Admission::Queued { id, granted } => {
                    tracing::debug!(queue_capacity = config.max_queued, "Bulkhead full; queueing");
                    let mut ticket = Ticket { shared: &shared, id, armed: true };
                    if granted.await.is_err() {
                        ticket.armed = false;
                        return Err(ResilienceError::BulkheadRejected {
                            in_flight: config.max_concurrency,
                            max: config.max_concurrency,
                        });
                    }
                    ticket.armed = false;
                    Slot { shared: &shared }
                }
                Admission::Rejected { in_flight } => {
                    tracing::debug!(in_flight, max = config.max_concurrency, "Bulkhead rejected");
                    return Err(ResilienceError::BulkheadRejected {
                        in_flight,
                        max: config.max_concurrency,
                    });
                }
            };

            let operation = execution.delegate(operation);
            operation().await
        })
    }

    fn wrap(&self, inner: Arc<dyn Policy<T, E>>) -> Result<(), ConfigError> {
        self.shared.core.wrap(inner)
    }

    fn executing(&self) -> usize {
        self.shared.core.executing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    type Bulkhead = BulkheadPolicy<u32, TestError>;

    fn bulkhead(size: usize, queue: usize) -> Bulkhead {
        let bulkhead = Bulkhead::new();
        bulkhead.max_concurrency(size).unwrap();
        bulkhead.max_queued_actions(queue).unwrap();
        bulkhead
    }

    /// Spawn an execution that holds its slot until `release` is notified.
    fn hold(
        bulkhead: &Bulkhead,
        release: &Arc<Notify>,
        value: u32,
    ) -> tokio::task::JoinHandle<Result<u32, ResilienceError<TestError>>> {
        let release = release.clone();
        let running = bulkhead.execute(move || {
            let release = release.clone();
            async move {
                release.notified().await;
                Ok(value)
            }
        });
        tokio::spawn(running)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn defaults_are_unbounded_without_queue() {
        let bulkhead = Bulkhead::new();
        assert_eq!(bulkhead.available_slots_count(), usize::MAX);
        assert_eq!(bulkhead.available_queued_actions_count(), 0);
        let calls = (0..50).map(|v| bulkhead.execute(move || async move { Ok(v) }));
        let results = join_all(calls).await;
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[tokio::test]
    async fn size_one_queue_one_rejects_third_call() {
        let bulkhead = bulkhead(1, 1);
        let first_release = Arc::new(Notify::new());
        let second_release = Arc::new(Notify::new());

        let first = hold(&bulkhead, &first_release, 1);
        settle().await;
        assert_eq!(bulkhead.available_slots_count(), 0);
        assert_eq!(bulkhead.available_queued_actions_count(), 1);

        let second = hold(&bulkhead, &second_release, 2);
        settle().await;
        assert_eq!(bulkhead.available_queued_actions_count(), 0);

        let third = bulkhead.execute(|| async { Ok(3) }).await;
        assert_eq!(third.unwrap_err(), ResilienceError::BulkheadRejected { in_flight: 1, max: 1 });

        first_release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 1);
        settle().await;
        // second now owns the slot handed over by first
        assert_eq!(bulkhead.available_slots_count(), 0);
        assert_eq!(bulkhead.available_queued_actions_count(), 1);

        second_release.notify_one();
        assert_eq!(second.await.unwrap().unwrap(), 2);
        assert_eq!(bulkhead.available_slots_count(), 1);
        assert_eq!(bulkhead.executing(), 0);
    }

    #[tokio::test]
    async fn queued_waiters_run_in_arrival_order() {
        let bulkhead = bulkhead(1, 3);
        let release = Arc::new(Notify::new());
        let holder = hold(&bulkhead, &release, 0);
        settle().await;

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for id in 1..=3u32 {
            let order = order.clone();
            let running = bulkhead.execute(move || {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(id);
                    Ok(id)
                }
            });
            waiters.push(tokio::spawn(running));
            settle().await;
        }
        assert_eq!(bulkhead.available_queued_actions_count(), 0);

        release.notify_one();
        holder.await.unwrap().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(bulkhead.available_slots_count(), 1);
    }

    #[tokio::test]
    async fn slot_released_on_error() {
        let bulkhead = bulkhead(1, 0);
        let result = bulkhead
            .execute(|| async { Err(ResilienceError::Inner(TestError("x".into()))) })
            .await;
        assert!(result.unwrap_err().is_inner());
        assert_eq!(bulkhead.available_slots_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_queue() {
        let bulkhead = bulkhead(1, 2);
        let release = Arc::new(Notify::new());
        let holder = hold(&bulkhead, &release, 1);
        settle().await;

        let waiter = hold(&bulkhead, &Arc::new(Notify::new()), 2);
        settle().await;
        assert_eq!(bulkhead.available_queued_actions_count(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(bulkhead.available_queued_actions_count(), 2);

        release.notify_one();
        holder.await.unwrap().unwrap();
        assert_eq!(bulkhead.available_slots_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_never_exceeds_size() {
        let bulkhead = bulkhead(3, 100);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..40).map(|i| {
            let live = live.clone();
            let peak = peak.clone();
            let running = bulkhead.execute(move || {
                let live = live.clone();
                let peak = peak.clone();
                async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            });
            tokio::spawn(running)
        });
        let results = join_all(tasks).await;
        assert!(results.into_iter().all(|r| r.unwrap().is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(bulkhead.available_slots_count(), 3);
        assert_eq!(bulkhead.available_queued_actions_count(), 100);
    }

    #[test]
    fn setters_validate() {
        let bulkhead = Bulkhead::new();
        assert!(matches!(
            bulkhead.max_concurrency(0),
            Err(ConfigError::InvalidArgument { name: "max_concurrency", .. })
        ));
        assert!(bulkhead.max_queued_actions(0).is_ok());
    }
}
