//! Controller error types.

use corral_core::{JobId, TriggerId, errno};
use corral_plugin::PluginError;
use corral_sched::SchedError;
use corral_select::SelectError;
use corral_state::StateError;
use thiserror::Error;

pub type ControllerResult<T> = Result<T, ControllerError>;

/// Why a controller request or lifecycle step failed.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid job id {0}")]
    InvalidJob(JobId),

    #[error("invalid node name {0}")]
    InvalidNode(String),

    #[error("invalid partition name {0}")]
    InvalidPartition(String),

    #[error("invalid trigger id {0}")]
    InvalidTrigger(TriggerId),

    #[error("job {0} already completed")]
    AlreadyDone(JobId),

    #[error("{requested} CPUs requested, largest node in partition {partition} has {largest}")]
    TooManyCpus {
        partition: String,
        requested: u32,
        largest: u32,
    },

    #[error("partition {0} has active jobs")]
    PartitionInUse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sched(#[from] SchedError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

impl ControllerError {
    /// The return code sent back to the client.
    pub fn code(&self) -> i32 {
        match self {
            ControllerError::InvalidJob(_) => errno::INVALID_JOB_ID,
            ControllerError::InvalidNode(_) => errno::INVALID_NODE_NAME,
            ControllerError::InvalidPartition(_) => errno::INVALID_PARTITION_NAME,
            ControllerError::InvalidTrigger(_) => errno::INVALID_TRIGGER_ID,
            ControllerError::AlreadyDone(_) => errno::ALREADY_DONE,
            ControllerError::TooManyCpus { .. } => errno::TOO_MANY_REQUESTED_CPUS,
            ControllerError::PartitionInUse(_) => errno::PARTITION_IN_USE,
            ControllerError::InvalidArgument(_) | ControllerError::Config(_) => errno::INVALID_ARGUMENT,
            ControllerError::Sched(e) => e.code(),
            ControllerError::Io(_) => errno::ERROR,
            ControllerError::Select(_) => errno::INVALID_ARGUMENT,
            ControllerError::State(_) => errno::WRITING_TO_FILE,
            ControllerError::Plugin(e) => e.code(),
        }
    }
}
