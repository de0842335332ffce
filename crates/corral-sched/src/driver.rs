//! Lifecycle of the active scheduling policy.
//!
//! ```text
//! Unloaded ──start──▶ Initializing ──init ok──▶ Running ──shutdown──▶ ShuttingDown ──▶ Unloaded
//!                          │
//!                          └──init failed──▶ Unloaded
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use corral_core::errno;
use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::error::{SchedError, SchedResult};
use crate::policy::{SchedulingPolicy, default_initial_priority};

/// Join attempts before an agent that ignores cancellation is detached.
const JOIN_ATTEMPTS: u32 = 4;
const JOIN_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Unloaded,
    Initializing,
    Running,
    ShuttingDown,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverState::Unloaded => "unloaded",
            DriverState::Initializing => "initializing",
            DriverState::Running => "running",
            DriverState::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

struct AgentHandle {
    token: CancelToken,
    thread: JoinHandle<()>,
}

struct Inner {
    state: DriverState,
    policy: Option<Arc<dyn SchedulingPolicy>>,
    agent: Option<AgentHandle>,
}

/// Owns the active policy and its agent thread.
pub struct SchedDriver {
    inner: Mutex<Inner>,
}

impl Default for SchedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedDriver {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: DriverState::Unloaded,
                policy: None,
                agent: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("sched driver lock poisoned")
    }

    pub fn state(&self) -> DriverState {
        self.lock().state
    }

    /// Type tag of the running policy.
    pub fn sched_type(&self) -> Option<String> {
        self.lock().policy.as_ref().map(|p| p.sched_type().to_string())
    }

    /// Initialize `policy` and start its agent.
    ///
    /// Fails with [`SchedError::AlreadyActive`] if any policy is loaded;
    /// the loaded one keeps running.
    pub fn start(&self, policy: Box<dyn SchedulingPolicy>) -> SchedResult<()> {
        let mut inner = self.lock();
        if inner.state != DriverState::Unloaded {
            let active = inner
                .policy
                .as_ref()
                .map_or_else(|| inner.state.to_string(), |p| p.sched_type().to_string());
            warn!(requested = policy.sched_type(), %active, "scheduling policy already active");
            return Err(SchedError::AlreadyActive(active));
        }

        let policy: Arc<dyn SchedulingPolicy> = Arc::from(policy);
        let sched_type = policy.sched_type().to_string();
        inner.state = DriverState::Initializing;

        if let Err(code) = policy.init() {
            inner.state = DriverState::Unloaded;
            error!(%sched_type, code, "scheduling policy init failed");
            return Err(SchedError::InitFailed {
                policy: sched_type,
                code,
            });
        }

        if let Some(agent) = policy.agent() {
            let token = CancelToken::new();
            let agent_token = token.clone();
            let spawned = std::thread::Builder::new()
                .name("sched-agent".to_string())
                .spawn(move || agent(agent_token));
            match spawned {
                Ok(thread) => inner.agent = Some(AgentHandle { token, thread }),
                Err(e) => {
                    policy.fini();
                    inner.state = DriverState::Unloaded;
                    error!(%sched_type, error = %e, "failed to start scheduling agent");
                    return Err(SchedError::Spawn(e));
                }
            }
        }

        inner.policy = Some(policy);
        inner.state = DriverState::Running;
        info!(%sched_type, agent = inner.agent.is_some(), "scheduling policy started");
        Ok(())
    }

    /// Stop the agent, run `fini`, and return to `Unloaded`. A no-op when
    /// nothing is loaded.
    pub fn shutdown(&self) {
        let (policy, agent) = {
            let mut inner = self.lock();
            if inner.state != DriverState::Running {
                return;
            }
            inner.state = DriverState::ShuttingDown;
            (inner.policy.take(), inner.agent.take())
        };

        let sched_type = policy
            .as_ref()
            .map(|p| p.sched_type().to_string())
            .unwrap_or_default();

        if let Some(agent) = agent {
            agent.token.cancel();
            stop_agent(&sched_type, agent.thread);
        }
        if let Some(policy) = policy {
            policy.fini();
        }

        self.lock().state = DriverState::Unloaded;
        info!(%sched_type, "scheduling policy stopped");
    }

    fn running(&self) -> Option<Arc<dyn SchedulingPolicy>> {
        let inner = self.lock();
        match inner.state {
            DriverState::Running => inner.policy.clone(),
            _ => None,
        }
    }

    /// Ask the policy for a pass. The policy runs without the driver lock.
    pub fn schedule(&self) -> SchedResult<()> {
        let policy = self.running().ok_or(SchedError::NotRunning)?;
        match policy.schedule() {
            errno::SUCCESS => Ok(()),
            code => Err(SchedError::Policy {
                policy: policy.sched_type().to_string(),
                code,
                message: policy
                    .strerror(code)
                    .unwrap_or_else(|| errno::strerror(code).to_string()),
            }),
        }
    }

    pub fn initial_priority(&self, max_priority: u32) -> u32 {
        match self.running() {
            Some(policy) => policy.initial_priority(max_priority),
            None => default_initial_priority(max_priority),
        }
    }

    pub fn job_is_pending(&self) {
        if let Some(policy) = self.running() {
            policy.job_is_pending();
        }
    }

    pub fn errno(&self) -> i32 {
        self.running().map_or(errno::DISABLED, |p| p.errno())
    }

    pub fn strerror(&self, code: i32) -> String {
        self.running()
            .and_then(|p| p.strerror(code))
            .unwrap_or_else(|| errno::strerror(code).to_string())
    }
}

impl Drop for SchedDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Join the agent with a bounded number of attempts; detach it if it
/// never exits.
fn stop_agent(sched_type: &str, thread: JoinHandle<()>) {
    for attempt in 0..JOIN_ATTEMPTS {
        if thread.is_finished() {
            if thread.join().is_err() {
                error!(%sched_type, "scheduling agent panicked");
            }
            return;
        }
        std::thread::sleep(JOIN_BACKOFF * (attempt + 1));
    }
    if thread.is_finished() {
        let _ = thread.join();
        return;
    }
    error!(%sched_type, attempts = JOIN_ATTEMPTS, "scheduling agent did not stop, detaching");
}
