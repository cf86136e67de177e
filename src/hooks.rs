//! Ordered callback registries.
//!
//! Hooks of one kind run sequentially in registration order, each awaited before the next one
//! starts. A hook fails by returning `Err` or by panicking; either way the failure is logged and
//! discarded, so sibling hooks and the policy's control flow are unaffected.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Output types a hook future may resolve to.
pub trait HookOutcome {
    fn into_hook_result(self) -> Result<(), String>;
}

impl HookOutcome for () {
    fn into_hook_result(self) -> Result<(), String> {
        Ok(())
    }
}

impl<Er: fmt::Display> HookOutcome for Result<(), Er> {
    fn into_hook_result(self) -> Result<(), String> {
        self.map_err(|e| e.to_string())
    }
}

type HookFn<A> = Arc<dyn Fn(&A) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

pub(crate) struct Hooks<A> {
    entries: Vec<HookFn<A>>,
}

impl<A> Clone for Hooks<A> {
    fn clone(&self) -> Self {
        Self { entries: self.entries.clone() }
    }
}

impl<A> Default for Hooks<A> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<A> Hooks<A> {
    pub(crate) fn push<F, Fut>(&mut self, hook: F)
    where
        F: Fn(&A) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.entries.push(Arc::new(move |args: &A| {
            let fut = hook(args);
            async move { fut.await.into_hook_result() }.boxed()
        }));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run every hook in order; failures are swallowed.
    pub(crate) async fn run(&self, kind: &'static str, args: &A) {
        for (index, hook) in self.entries.iter().enumerate() {
            let started = std::panic::catch_unwind(AssertUnwindSafe(|| hook(args)));
            let outcome = match started {
                Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(_) => Err("hook panicked".to_string()),
                },
                Err(_) => Err("hook panicked".to_string()),
            };
            if let Err(reason) = outcome {
                tracing::warn!(hook = kind, index, %reason, "hook failed; ignoring");
            }
        }
    }
}

impl Hooks<()> {
    pub(crate) fn push_unit<F, Fut>(&mut self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: HookOutcome,
    {
        self.push(move |_: &()| hook());
    }

    pub(crate) async fn fire(&self, kind: &'static str) {
        self.run(kind, &()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut hooks: Hooks<u32> = Hooks::default();
        for id in 0..3u32 {
            let log = log.clone();
            hooks.push(move |arg: &u32| {
                let log = log.clone();
                let value = *arg + id;
                async move {
                    // later hooks sleep less; ordering must still hold
                    tokio::time::sleep(Duration::from_millis(u64::from(3 - id))).await;
                    log.lock().unwrap().push(value);
                }
            });
        }
        hooks.run("test", &10).await;
        assert_eq!(*log.lock().unwrap(), vec![10, 11, 12]);
    }

    #[tokio::test]
    async fn failing_hooks_do_not_stop_siblings() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut hooks: Hooks<()> = Hooks::default();
        let c = calls.clone();
        hooks.push_unit(move || {
            c.lock().unwrap().push("err");
            async { Err::<(), _>("nope") }
        });
        let c = calls.clone();
        hooks.push_unit(move || {
            c.lock().unwrap().push("panic-before-future");
            if true {
                panic!("sync panic");
            }
            async {}
        });
        let c = calls.clone();
        hooks.push_unit(move || {
            let c = c.clone();
            async move {
                c.lock().unwrap().push("panic-inside-future");
                if true {
                    panic!("async panic");
                }
            }
        });
        let c = calls.clone();
        hooks.push_unit(move || {
            c.lock().unwrap().push("ok");
            async {}
        });

        hooks.fire("test").await;
        assert_eq!(
            *calls.lock().unwrap(),
            vec!["err", "panic-before-future", "panic-inside-future", "ok"]
        );
        assert_eq!(hooks.len(), 4);
    }
}
