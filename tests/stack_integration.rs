mod common;

use bulwark::prelude::*;
use common::{init_tracing, TestError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Outcome = Result<&'static str, ResilienceError<TestError>>;

#[tokio::test(start_paused = true)]
async fn full_pipeline_falls_back_once_circuit_opens() {
    init_tracing();

    let fallback = FallbackPolicy::<&'static str, TestError>::new();
    fallback.react_on_error(|e| e.is_broken_circuit() || e.is_timeout()).unwrap();
    fallback.fallback(|| async { Ok("stale") }).unwrap();

    let retry = RetryPolicy::<&'static str, TestError>::new();
    retry.retry_count(3).unwrap();
    retry.react_on_error(|e| e.is_timeout() || e.is_broken_circuit()).unwrap();

    let breaker = CircuitBreakerPolicy::<&'static str, TestError>::new();
    breaker.break_after(2).unwrap();
    breaker.break_for(60_000).unwrap();
    breaker.react_on_error(|e| e.is_timeout()).unwrap();

    let timeout = TimeoutPolicy::<&'static str, TestError>::new();
    timeout.timeout_after(100).unwrap();

    let pipeline = PolicyCombination::combine(vec![
        fallback.shared(),
        retry.shared(),
        breaker.shared(),
        timeout.shared(),
    ])
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let result = pipeline
        .execute_operation(operation(move || {
            c.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("fresh")
            }
        }))
        .await;

    assert_eq!(result.unwrap(), "stale");
    // two timeouts open the breaker; the remaining retries fail fast
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(pipeline.executing(), 0);
}

#[tokio::test]
async fn wrapped_policies_share_state_with_direct_handles() {
    let retry = RetryPolicy::<&'static str, TestError>::new();
    retry.retry_count(1).unwrap();
    retry.react_on_error(|e| e.is_inner()).unwrap();

    let breaker = CircuitBreakerPolicy::<&'static str, TestError>::new();
    breaker.break_after(2).unwrap();
    breaker.react_on_error(|e| e.is_inner()).unwrap();
    retry.wrap(breaker.shared()).unwrap();

    let result: Outcome =
        retry.execute(|| async { Err(ResilienceError::Inner(TestError("down"))) }).await;
    assert_eq!(result.unwrap_err(), ResilienceError::Inner(TestError("down")));
    assert_eq!(breaker.state(), CircuitState::Open);

    // the same breaker now rejects direct callers too
    let direct = breaker.execute(|| async { Ok("up") }).await;
    assert!(direct.unwrap_err().is_broken_circuit());
}

#[tokio::test]
async fn cache_hit_skips_inner_pipeline() {
    let clock = ManualClock::new(0);
    let cache = CachePolicy::<&'static str, TestError>::with_clock(clock.clone());
    cache.time_to_live(TimeToLiveStrategy::Relative, 10_000).unwrap();

    let retry = RetryPolicy::<&'static str, TestError>::new();
    retry.react_on_result(|v: &&'static str| v.is_empty()).unwrap();
    let inner_runs = Arc::new(AtomicUsize::new(0));
    let r = inner_runs.clone();
    retry
        .on_finally(move || {
            r.fetch_add(1, Ordering::SeqCst);
            async {}
        })
        .unwrap();
    cache.wrap(retry.shared()).unwrap();

    for _ in 0..3 {
        assert_eq!(cache.execute(|| async { Ok("value") }).await.unwrap(), "value");
    }
    assert_eq!(inner_runs.load(Ordering::SeqCst), 1);

    clock.advance(10_000);
    cache.execute(|| async { Ok("value") }).await.unwrap();
    assert_eq!(inner_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn bulkhead_guards_timeout_pipeline() {
    let bulkhead = BulkheadPolicy::<&'static str, TestError>::new();
    bulkhead.max_concurrency(1).unwrap();
    let timeout = TimeoutPolicy::<&'static str, TestError>::new();
    timeout.timeout_after(1_000).unwrap();
    bulkhead.wrap(timeout.shared()).unwrap();

    let holding = bulkhead.clone();
    let holder = tokio::spawn(async move {
        holding
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("done")
            })
            .await
    });
    while bulkhead.available_slots_count() == 1 {
        tokio::task::yield_now().await;
    }

    let rejected = bulkhead.execute(|| async { Ok("second") }).await;
    assert_eq!(rejected.unwrap_err(), ResilienceError::BulkheadRejected { in_flight: 1, max: 1 });
    assert_eq!(holder.await.unwrap().unwrap(), "done");
    assert_eq!(bulkhead.available_slots_count(), 1);
}

#[tokio::test]
async fn reconfiguration_is_refused_mid_pipeline() {
    let outer = RetryPolicy::<&'static str, TestError>::new();
    let inner = TimeoutPolicy::<&'static str, TestError>::new();
    outer.wrap(inner.shared()).unwrap();

    let probe = inner.clone();
    let refused = Arc::new(AtomicUsize::new(0));
    let r = refused.clone();
    outer
        .execute(move || {
            if probe.timeout_after(10) == Err(ConfigError::ModificationNotAllowed) {
                r.fetch_add(1, Ordering::SeqCst);
            }
            async { Ok("ok") }
        })
        .await
        .unwrap();

    assert_eq!(refused.load(Ordering::SeqCst), 1);
    inner.timeout_after(10).unwrap();
}

#[tokio::test]
async fn circuit_recovers_through_pipeline_after_break() {
    let clock = ManualClock::new(0);
    let breaker = CircuitBreakerPolicy::<&'static str, TestError>::with_clock(clock.clone());
    breaker.break_for(5_000).unwrap();
    breaker.react_on_error(|e| e.is_inner()).unwrap();
    let fallback = FallbackPolicy::<&'static str, TestError>::new();
    fallback.react_on_error(|e| e.is_broken_circuit()).unwrap();
    fallback.fallback(|| async { Ok("degraded") }).unwrap();
    fallback.wrap(breaker.shared()).unwrap();

    let failing: Outcome =
        fallback.execute(|| async { Err(ResilienceError::Inner(TestError("x"))) }).await;
    assert!(failing.unwrap_err().is_inner());
    assert_eq!(fallback.execute(|| async { Ok("live") }).await.unwrap(), "degraded");

    clock.advance(5_000);
    assert_eq!(fallback.execute(|| async { Ok("live") }).await.unwrap(), "live");
    assert_eq!(breaker.state(), CircuitState::Closed);
}
