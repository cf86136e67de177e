//! Chaining policies into a pipeline.
//!
//! `combine([p1, p2, p3])` makes `p1` wrap `p2` and `p2` wrap `p3`, so executing `p1` runs
//! `p1(p2(p3(operation)))`. Wrapping goes from the innermost pair outward.

use crate::error::ConfigError;
use crate::policy::Policy;
use std::sync::Arc;

/// Builds nested policy pipelines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyCombination;

impl PolicyCombination {
    /// Wrap each policy around the next and return the outermost one.
    ///
    /// Needs at least two policies. A failing `wrap` (a policy is executing) stops the fold and
    /// is returned; pairs already wrapped stay wrapped.
    ///
    /// ```rust
    /// use bulwark::prelude::*;
    ///
    /// # tokio::runtime::Runtime::new().unwrap().block_on(async {
    /// let retry = RetryPolicy::<u32, std::io::Error>::new();
    /// retry.react_on_error(|e| e.is_timeout()).unwrap();
    /// let timeout = TimeoutPolicy::new();
    /// timeout.timeout_after(500).unwrap();
    ///
    /// let pipeline = PolicyCombination::combine(vec![retry.shared(), timeout.shared()]).unwrap();
    /// let value = pipeline.execute_operation(operation(|| async { Ok(3) })).await.unwrap();
    /// assert_eq!(value, 3);
    /// # });
    /// ```
    pub fn combine<T, E>(
        policies: Vec<Arc<dyn Policy<T, E>>>,
    ) -> Result<Arc<dyn Policy<T, E>>, ConfigError> {
        if policies.len() < 2 {
            return Err(ConfigError::NotEnoughPolicies(policies.len()));
        }
        for pair in policies.windows(2).rev() {
            pair[0].wrap(pair[1].clone())?;
        }
        Ok(policies[0].clone())
    }
}
