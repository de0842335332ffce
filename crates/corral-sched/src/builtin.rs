//! Policies compiled into the controller.
//!
//! | Type             | Pass on demand | Agent          | New-job priority         |
//! |------------------|----------------|----------------|--------------------------|
//! | `sched/builtin`  | yes            | none           | descending               |
//! | `sched/backfill` | yes            | backfill loop  | descending               |
//! | `sched/hold`     | yes            | none           | 0 while hold file exists |
//! | `sched/wiki`     | no             | none           | always 0                 |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use corral_core::errno;
use corral_plugin::PluginRegistry;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::dynamic::DynamicPolicy;
use crate::error::SchedResult;
use crate::policy::{Agent, SchedulerHost, SchedulingPolicy, default_initial_priority};

/// Settings the built-in policies read from controller config.
#[derive(Debug, Clone)]
pub struct PolicyOptions {
    pub backfill_interval: Duration,
    pub hold_file: Option<PathBuf>,
}

impl Default for PolicyOptions {
    fn default() -> Self {
        Self {
            backfill_interval: Duration::from_secs(30),
            hold_file: None,
        }
    }
}

/// Build the policy named by `sched_type`. Unknown types are loaded from
/// the plugin registry.
pub fn policy_for(
    sched_type: &str,
    options: &PolicyOptions,
    host: Arc<dyn SchedulerHost>,
    registry: &Arc<PluginRegistry>,
) -> SchedResult<Box<dyn SchedulingPolicy>> {
    let policy: Box<dyn SchedulingPolicy> = match sched_type {
        "sched/builtin" => Box::new(Builtin::new(host)),
        "sched/backfill" => Box::new(Backfill::new(host, options.backfill_interval)),
        "sched/hold" => Box::new(Hold::new(host, options.hold_file.clone())),
        "sched/wiki" => Box::new(Wiki),
        other => Box::new(DynamicPolicy::load(Arc::clone(registry), other)?),
    };
    debug!(%sched_type, "scheduling policy constructed");
    Ok(policy)
}

// ── sched/builtin ──────────────────────────────────────────────────

/// Strict priority order, scheduled whenever the controller asks.
pub struct Builtin {
    host: Arc<dyn SchedulerHost>,
}

impl Builtin {
    pub fn new(host: Arc<dyn SchedulerHost>) -> Self {
        Self { host }
    }
}

impl SchedulingPolicy for Builtin {
    fn sched_type(&self) -> &str {
        "sched/builtin"
    }

    fn schedule(&self) -> i32 {
        self.host.run_pass();
        errno::SUCCESS
    }
}

// ── sched/backfill ─────────────────────────────────────────────────

/// Builtin plus a periodic pass that starts lower-priority jobs when
/// they fit in the gaps.
pub struct Backfill {
    host: Arc<dyn SchedulerHost>,
    interval: Duration,
}

impl Backfill {
    pub fn new(host: Arc<dyn SchedulerHost>, interval: Duration) -> Self {
        Self { host, interval }
    }
}

impl SchedulingPolicy for Backfill {
    fn sched_type(&self) -> &str {
        "sched/backfill"
    }

    fn schedule(&self) -> i32 {
        self.host.run_pass();
        errno::SUCCESS
    }

    fn agent(&self) -> Option<Agent> {
        let host = Arc::clone(&self.host);
        let interval = self.interval;
        Some(Box::new(move |token: CancelToken| {
            info!(interval_secs = interval.as_secs(), "backfill agent started");
            while !token.wait_timeout(interval) {
                let started = host.backfill_pass();
                if started > 0 {
                    info!(started, "backfill pass started jobs");
                }
            }
            info!("backfill agent stopped");
        }))
    }
}

// ── sched/hold ─────────────────────────────────────────────────────

/// Builtin, except that new jobs arrive held while the hold file exists.
pub struct Hold {
    host: Arc<dyn SchedulerHost>,
    hold_file: Option<PathBuf>,
}

impl Hold {
    pub fn new(host: Arc<dyn SchedulerHost>, hold_file: Option<PathBuf>) -> Self {
        Self { host, hold_file }
    }

    fn holding(&self) -> bool {
        self.hold_file.as_deref().is_some_and(|p| p.exists())
    }
}

impl SchedulingPolicy for Hold {
    fn sched_type(&self) -> &str {
        "sched/hold"
    }

    fn schedule(&self) -> i32 {
        self.host.run_pass();
        errno::SUCCESS
    }

    fn initial_priority(&self, max_priority: u32) -> u32 {
        if self.holding() {
            0
        } else {
            default_initial_priority(max_priority)
        }
    }
}

// ── sched/wiki ─────────────────────────────────────────────────────

/// An external scheduler decides; every job arrives held and the
/// controller never starts anything on its own.
pub struct Wiki;

impl SchedulingPolicy for Wiki {
    fn sched_type(&self) -> &str {
        "sched/wiki"
    }

    fn schedule(&self) -> i32 {
        errno::SUCCESS
    }

    fn initial_priority(&self, _max_priority: u32) -> u32 {
        0
    }
}
