//! Active-policy buffer shared between the re-plan path and the control path
//!
//! Publishing swaps an `Arc` under a write lock; readers clone the `Arc`
//! under a read lock. A reader therefore always holds one complete policy,
//! and the critical section on either side is a pointer copy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::policy::FeedbackPolicy;
use crate::solver::{CancelToken, Solution};
use crate::trajectory::Trajectory;

/// Policy currently applied by the controller
#[derive(Debug, Clone)]
pub struct ActivePolicy {
    pub policy: FeedbackPolicy,
    /// Optimized trajectory the policy was built around
    pub trajectory: Trajectory,
    pub cost: f64,
    /// Monotonically increasing, starting at 1
    pub version: u64,
    /// Time of the measurement the solve started from [s]
    pub generated_at: f64,
    pub solve_time: Duration,
}

/// Result of a solve, ready to be published
#[derive(Debug, Clone)]
pub struct PolicyUpdate {
    pub policy: FeedbackPolicy,
    pub trajectory: Trajectory,
    pub cost: f64,
    pub generated_at: f64,
    pub solve_time: Duration,
}

impl PolicyUpdate {
    pub fn from_solution(solution: Solution, generated_at: f64) -> Self {
        Self {
            policy: solution.policy,
            trajectory: solution.trajectory,
            cost: solution.cost,
            generated_at,
            solve_time: solution.statistics.solve_time,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    slot: RwLock<Option<Arc<ActivePolicy>>>,
    version: AtomicU64,
}

/// Cloneable handle to the active policy
#[derive(Debug, Clone, Default)]
pub struct PolicyBuffer {
    shared: Arc<Shared>,
}

impl PolicyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `update` the active policy and return its version
    pub fn publish(&self, update: PolicyUpdate) -> u64 {
        let mut slot = self.shared.slot.write().unwrap_or_else(PoisonError::into_inner);
        self.install(&mut slot, update)
    }

    /// Publish unless `token` was cancelled; the check happens under the
    /// write lock so a cancelled solve can never become active
    pub fn publish_unless_cancelled(
        &self,
        update: PolicyUpdate,
        token: &CancelToken,
    ) -> Option<u64> {
        let mut slot = self.shared.slot.write().unwrap_or_else(PoisonError::into_inner);
        if token.is_cancelled() {
            return None;
        }
        Some(self.install(&mut slot, update))
    }

    /// Cancel `token` under the write lock and return the current version
    ///
    /// A solve publishing with the same token either got in before this
    /// call, and is counted in the returned version, or is refused.
    pub fn revoke(&self, token: &CancelToken) -> u64 {
        let _slot = self.shared.slot.write().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        self.version()
    }

    /// Current policy, if any
    pub fn load(&self) -> Option<Arc<ActivePolicy>> {
        self.shared
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Version of the last published policy, 0 if none
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.load().is_none()
    }

    /// Drop the active policy; version numbers keep increasing
    pub fn clear(&self) {
        let mut slot = self.shared.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    fn install(&self, slot: &mut Option<Arc<ActivePolicy>>, update: PolicyUpdate) -> u64 {
        let version = self.shared.version.load(Ordering::Acquire) + 1;
        *slot = Some(Arc::new(ActivePolicy {
            policy: update.policy,
            trajectory: update.trajectory,
            cost: update.cost,
            version,
            generated_at: update.generated_at,
            solve_time: update.solve_time,
        }));
        self.shared.version.store(version, Ordering::Release);
        version
    }
}
