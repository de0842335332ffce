//! Scheduling error types.

use corral_core::errno;
use corral_plugin::PluginError;
use thiserror::Error;

pub type SchedResult<T> = Result<T, SchedError>;

#[derive(Debug, Error)]
pub enum SchedError {
    /// A policy is already running; it was left untouched.
    #[error("scheduling policy {0} is already active")]
    AlreadyActive(String),

    #[error("scheduling policy {policy} init failed with code {code}")]
    InitFailed { policy: String, code: i32 },

    #[error("no scheduling policy is running")]
    NotRunning,

    #[error("scheduling policy {policy} failed: {message} ({code})")]
    Policy {
        policy: String,
        code: i32,
        message: String,
    },

    #[error("failed to spawn agent thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl SchedError {
    pub fn code(&self) -> i32 {
        match self {
            SchedError::AlreadyActive(_) => errno::PLUGIN_ALREADY_ACTIVE,
            SchedError::InitFailed { .. } => errno::PLUGIN_INIT_FAILED,
            SchedError::NotRunning => errno::DISABLED,
            SchedError::Policy { code, .. } => *code,
            SchedError::Spawn(_) => errno::ERROR,
            SchedError::Plugin(e) => e.code(),
        }
    }
}
