//! Tower integration: run a tower `Service` under any policy.
//!
//! Each policy attempt clones the inner service and the request, waits for readiness and calls
//! it once, so retries and fallbacks never reuse a consumed request. Service errors arrive in the
//! policy as [`ResilienceError::Inner`].
//!
//! ```rust
//! use bulwark::prelude::*;
//! use tower::{service_fn, ServiceExt};
//! use tower_layer::Layer;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let retry = RetryPolicy::<String, std::io::Error>::new();
//! retry.react_on_error(|e| e.is_inner()).unwrap();
//!
//! let service = PolicyLayer::new(retry).layer(service_fn(|name: &'static str| async move {
//!     Ok::<_, std::io::Error>(format!("hello {name}"))
//! }));
//! let reply = service.oneshot("bulwark").await.unwrap();
//! assert_eq!(reply, "hello bulwark");
//! # });
//! ```

use crate::error::ResilienceError;
use crate::policy::{OperationFuture, Policy};
use futures::{FutureExt, TryFutureExt};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Tower layer wrapping services in a policy.
#[derive(Debug, Clone)]
pub struct PolicyLayer<P> {
    policy: P,
}

impl<P> PolicyLayer<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }
}

impl<S, P: Clone> Layer<S> for PolicyLayer<P> {
    type Service = PolicyService<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        PolicyService { inner, policy: self.policy.clone() }
    }
}

/// Service produced by [`PolicyLayer`].
#[derive(Debug, Clone)]
pub struct PolicyService<S, P> {
    inner: S,
    policy: P,
}

impl<S, P> PolicyService<S, P> {
    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, P, Request> Service<Request> for PolicyService<S, P>
where
    Request: Clone + Send + Sync + 'static,
    S: Service<Request> + Clone + Send + Sync + 'static,
    S::Response: Send + Sync + 'static,
    S::Error: Send + Sync + 'static,
    S::Future: Send + 'static,
    P: Policy<S::Response, S::Error>,
{
    type Response = S::Response;
    type Error = ResilienceError<S::Error>;
    type Future = OperationFuture<S::Response, S::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // readiness is awaited per attempt on a fresh clone
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let inner = self.inner.clone();
        self.policy.execute_operation(Arc::new(move || {
            inner.clone().oneshot(request.clone()).map_err(ResilienceError::Inner).boxed()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::ReactivePolicy;
    use crate::retry::RetryPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::service_fn;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    #[tokio::test]
    async fn retries_failing_service_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let svc = service_fn(move |req: u32| {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError("flaky"))
                } else {
                    Ok(req * 10)
                }
            }
        });

        let retry = RetryPolicy::<u32, TestError>::new();
        retry.retry_count(3).unwrap();
        retry.react_on_error(|e| e.is_inner()).unwrap();

        let mut service = PolicyLayer::new(retry).layer(svc);
        let response = service.ready().await.unwrap().call(4).await.unwrap();
        assert_eq!(response, 40);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn errors_are_wrapped_as_inner() {
        let svc = service_fn(|_: ()| async { Err::<u32, _>(TestError("down")) });
        let service = PolicyLayer::new(RetryPolicy::<u32, TestError>::new()).layer(svc);
        let err = service.oneshot(()).await.unwrap_err();
        assert_eq!(err, ResilienceError::Inner(TestError("down")));
    }
}
