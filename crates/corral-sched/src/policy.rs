//! The scheduling-policy capability.

use corral_core::errno;

use crate::cancel::CancelToken;

/// Body of a policy's background thread. Must return promptly once the
/// token is cancelled.
pub type Agent = Box<dyn FnOnce(CancelToken) + Send + 'static>;

/// What a policy can ask the controller to do.
pub trait SchedulerHost: Send + Sync {
    /// Start pending jobs in priority order, stopping at the first one that
    /// does not fit. Returns the number started.
    fn run_pass(&self) -> usize;

    /// Start any pending job that fits now, regardless of order.
    fn backfill_pass(&self) -> usize;
}

/// A scheduling policy. Built-in policies implement this directly; loaded
/// plugins are wrapped by [`DynamicPolicy`](crate::DynamicPolicy).
pub trait SchedulingPolicy: Send + Sync {
    /// Type tag, e.g. `sched/backfill`.
    fn sched_type(&self) -> &str;

    /// Called once before the policy is used. A nonzero code aborts start.
    fn init(&self) -> Result<(), i32> {
        Ok(())
    }

    /// Called once after the agent, if any, has stopped.
    fn fini(&self) {}

    /// Run a scheduling pass. Returns an error code, 0 on success.
    fn schedule(&self) -> i32;

    fn initial_priority(&self, max_priority: u32) -> u32 {
        default_initial_priority(max_priority)
    }

    /// Notification that a job entered the pending queue.
    fn job_is_pending(&self) {}

    /// Last error code the policy recorded.
    fn errno(&self) -> i32 {
        errno::SUCCESS
    }

    /// Policy-specific text for `code`, if the policy has any.
    fn strerror(&self, _code: i32) -> Option<String> {
        None
    }

    /// Background work to run on a dedicated thread while the policy is
    /// active. Called once per start.
    fn agent(&self) -> Option<Agent> {
        None
    }
}

/// Descending priorities from just below `max_priority`, never 0.
pub fn default_initial_priority(max_priority: u32) -> u32 {
    if max_priority >= 2 {
        max_priority - 1
    } else {
        1
    }
}
