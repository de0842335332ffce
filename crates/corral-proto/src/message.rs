//! Message types and typed payloads.
//!
//! Each [`MessageType`] maps to exactly one payload struct. Decoding looks
//! only at the frame's message type to pick the struct, and every struct
//! rejects unknown fields, so a body written for one type never decodes
//! as another.

use std::fmt;
use std::net::SocketAddr;

use corral_core::{
    JobId, NodeState, ResourceRequest, TriggerEvent, TriggerId, TriggerResource,
};
use serde::{Deserialize, Serialize};

// ── Message type ──────────────────────────────────────────────────

/// Wire tag carried in every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    RequestReconfigure = 1003,
    RequestShutdown = 1005,
    RequestPing = 1008,
    RequestJobStepInfo = 2003,
    ResponseJobStepInfo = 2004,
    RequestNodeSelectInfo = 2009,
    ResponseNodeSelectInfo = 2010,
    RequestSetTrigger = 2015,
    ResponseSetTrigger = 2016,
    RequestClearTrigger = 2017,
    RequestUpdateJob = 3001,
    RequestUpdateNode = 3002,
    RequestUpdatePartition = 3005,
    RequestDeletePartition = 3006,
    RequestSubmitBatchJob = 4003,
    ResponseSubmitBatchJob = 4004,
    RequestCancelJob = 5005,
    ResponseSlurmRc = 8001,
}

impl MessageType {
    const ALL: [MessageType; 18] = [
        MessageType::RequestReconfigure,
        MessageType::RequestShutdown,
        MessageType::RequestPing,
        MessageType::RequestJobStepInfo,
        MessageType::ResponseJobStepInfo,
        MessageType::RequestNodeSelectInfo,
        MessageType::ResponseNodeSelectInfo,
        MessageType::RequestSetTrigger,
        MessageType::ResponseSetTrigger,
        MessageType::RequestClearTrigger,
        MessageType::RequestUpdateJob,
        MessageType::RequestUpdateNode,
        MessageType::RequestUpdatePartition,
        MessageType::RequestDeletePartition,
        MessageType::RequestSubmitBatchJob,
        MessageType::ResponseSubmitBatchJob,
        MessageType::RequestCancelJob,
        MessageType::ResponseSlurmRc,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_u16() == value)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::RequestReconfigure => "REQUEST_RECONFIGURE",
            MessageType::RequestShutdown => "REQUEST_SHUTDOWN",
            MessageType::RequestPing => "REQUEST_PING",
            MessageType::RequestJobStepInfo => "REQUEST_JOB_STEP_INFO",
            MessageType::ResponseJobStepInfo => "RESPONSE_JOB_STEP_INFO",
            MessageType::RequestNodeSelectInfo => "REQUEST_NODE_SELECT_INFO",
            MessageType::ResponseNodeSelectInfo => "RESPONSE_NODE_SELECT_INFO",
            MessageType::RequestSetTrigger => "REQUEST_SET_TRIGGER",
            MessageType::ResponseSetTrigger => "RESPONSE_SET_TRIGGER",
            MessageType::RequestClearTrigger => "REQUEST_CLEAR_TRIGGER",
            MessageType::RequestUpdateJob => "REQUEST_UPDATE_JOB",
            MessageType::RequestUpdateNode => "REQUEST_UPDATE_NODE",
            MessageType::RequestUpdatePartition => "REQUEST_UPDATE_PARTITION",
            MessageType::RequestDeletePartition => "REQUEST_DELETE_PARTITION",
            MessageType::RequestSubmitBatchJob => "REQUEST_SUBMIT_BATCH_JOB",
            MessageType::ResponseSubmitBatchJob => "RESPONSE_SUBMIT_BATCH_JOB",
            MessageType::RequestCancelJob => "REQUEST_CANCEL_JOB",
            MessageType::ResponseSlurmRc => "RESPONSE_SLURM_RC",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u16())
    }
}

// ── Request payloads ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownMsg {
    /// Stop only the controller, leaving node daemons running.
    pub core: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub priority: Option<u32>,
    /// `Some(true)` holds a pending job, `Some(false)` releases it.
    pub hold: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeUpdate {
    pub name: String,
    pub state: Option<NodeState>,
    pub reason: Option<String>,
}

/// Create a partition, or modify the fields given on an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionUpdate {
    pub name: String,
    pub nodes: Option<Vec<String>>,
    pub hidden: Option<bool>,
    pub state_up: Option<bool>,
    pub default: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitionDelete {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobStepInfoRequest {
    pub last_update: u64,
    /// `NO_VAL` selects every job.
    pub job_id: u32,
    /// `NO_VAL` selects every step.
    pub step_id: u32,
    pub show_flags: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSelectInfoRequest {
    pub last_update: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSubmit {
    pub name: String,
    pub partition: Option<String>,
    pub num_cpus: u32,
    #[serde(default)]
    pub resources: ResourceRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobCancel {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSet {
    pub resource: TriggerResource,
    pub event: TriggerEvent,
    pub program: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerClear {
    pub trigger_id: TriggerId,
}

// ── Response payloads ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReturnCodeMsg {
    pub return_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobStepInfo {
    pub job_id: JobId,
    pub step_id: u32,
    pub name: String,
    pub partition: String,
    pub node: String,
    pub num_cpus: u32,
    pub start_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobStepInfoResponse {
    pub last_update: u64,
    pub steps: Vec<JobStepInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSelectInfo {
    pub name: String,
    pub state: NodeState,
    pub cpus: u32,
    pub alloc_cpus: u32,
    pub sockets: u32,
    pub alloc_sockets: u32,
    /// CPUs a single-CPU job could still get under the active selector.
    pub avail_cpus: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSelectInfoResponse {
    pub last_update: u64,
    pub nodes: Vec<NodeSelectInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSubmitResponse {
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerSetResponse {
    pub trigger_id: TriggerId,
}

// ── Payload union ─────────────────────────────────────────────────

/// The typed union carried by an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Reconfigure,
    Shutdown(ShutdownMsg),
    Ping,
    JobStepInfo(JobStepInfoRequest),
    JobStepInfoResponse(JobStepInfoResponse),
    NodeSelectInfo(NodeSelectInfoRequest),
    NodeSelectInfoResponse(NodeSelectInfoResponse),
    SetTrigger(TriggerSet),
    SetTriggerResponse(TriggerSetResponse),
    ClearTrigger(TriggerClear),
    UpdateJob(JobUpdate),
    UpdateNode(NodeUpdate),
    UpdatePartition(PartitionUpdate),
    DeletePartition(PartitionDelete),
    SubmitBatchJob(JobSubmit),
    SubmitBatchJobResponse(JobSubmitResponse),
    CancelJob(JobCancel),
    ReturnCode(ReturnCodeMsg),
}

impl Payload {
    /// Shorthand for a `RESPONSE_SLURM_RC` payload.
    pub fn rc(return_code: i32) -> Self {
        Payload::ReturnCode(ReturnCodeMsg { return_code })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Reconfigure => MessageType::RequestReconfigure,
            Payload::Shutdown(_) => MessageType::RequestShutdown,
            Payload::Ping => MessageType::RequestPing,
            Payload::JobStepInfo(_) => MessageType::RequestJobStepInfo,
            Payload::JobStepInfoResponse(_) => MessageType::ResponseJobStepInfo,
            Payload::NodeSelectInfo(_) => MessageType::RequestNodeSelectInfo,
            Payload::NodeSelectInfoResponse(_) => MessageType::ResponseNodeSelectInfo,
            Payload::SetTrigger(_) => MessageType::RequestSetTrigger,
            Payload::SetTriggerResponse(_) => MessageType::ResponseSetTrigger,
            Payload::ClearTrigger(_) => MessageType::RequestClearTrigger,
            Payload::UpdateJob(_) => MessageType::RequestUpdateJob,
            Payload::UpdateNode(_) => MessageType::RequestUpdateNode,
            Payload::UpdatePartition(_) => MessageType::RequestUpdatePartition,
            Payload::DeletePartition(_) => MessageType::RequestDeletePartition,
            Payload::SubmitBatchJob(_) => MessageType::RequestSubmitBatchJob,
            Payload::SubmitBatchJobResponse(_) => MessageType::ResponseSubmitBatchJob,
            Payload::CancelJob(_) => MessageType::RequestCancelJob,
            Payload::ReturnCode(_) => MessageType::ResponseSlurmRc,
        }
    }

    /// Serialize the body. Bodiless messages encode to an empty slice.
    pub fn encode_body(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            Payload::Reconfigure | Payload::Ping => Ok(Vec::new()),
            Payload::Shutdown(m) => serde_json::to_vec(m),
            Payload::JobStepInfo(m) => serde_json::to_vec(m),
            Payload::JobStepInfoResponse(m) => serde_json::to_vec(m),
            Payload::NodeSelectInfo(m) => serde_json::to_vec(m),
            Payload::NodeSelectInfoResponse(m) => serde_json::to_vec(m),
            Payload::SetTrigger(m) => serde_json::to_vec(m),
            Payload::SetTriggerResponse(m) => serde_json::to_vec(m),
            Payload::ClearTrigger(m) => serde_json::to_vec(m),
            Payload::UpdateJob(m) => serde_json::to_vec(m),
            Payload::UpdateNode(m) => serde_json::to_vec(m),
            Payload::UpdatePartition(m) => serde_json::to_vec(m),
            Payload::DeletePartition(m) => serde_json::to_vec(m),
            Payload::SubmitBatchJob(m) => serde_json::to_vec(m),
            Payload::SubmitBatchJobResponse(m) => serde_json::to_vec(m),
            Payload::CancelJob(m) => serde_json::to_vec(m),
            Payload::ReturnCode(m) => serde_json::to_vec(m),
        }
    }

    /// Decode a body as the payload struct selected by `msg_type`.
    pub fn decode(msg_type: MessageType, body: &[u8]) -> Result<Self, String> {
        fn json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, String> {
            serde_json::from_slice(body).map_err(|e| e.to_string())
        }

        let payload = match msg_type {
            MessageType::RequestReconfigure | MessageType::RequestPing => {
                if !body.is_empty() {
                    return Err(format!("{msg_type} carries no body, got {} bytes", body.len()));
                }
                if msg_type == MessageType::RequestPing {
                    Payload::Ping
                } else {
                    Payload::Reconfigure
                }
            }
            MessageType::RequestShutdown => Payload::Shutdown(json(body)?),
            MessageType::RequestJobStepInfo => Payload::JobStepInfo(json(body)?),
            MessageType::ResponseJobStepInfo => Payload::JobStepInfoResponse(json(body)?),
            MessageType::RequestNodeSelectInfo => Payload::NodeSelectInfo(json(body)?),
            MessageType::ResponseNodeSelectInfo => Payload::NodeSelectInfoResponse(json(body)?),
            MessageType::RequestSetTrigger => Payload::SetTrigger(json(body)?),
            MessageType::ResponseSetTrigger => Payload::SetTriggerResponse(json(body)?),
            MessageType::RequestClearTrigger => Payload::ClearTrigger(json(body)?),
            MessageType::RequestUpdateJob => Payload::UpdateJob(json(body)?),
            MessageType::RequestUpdateNode => Payload::UpdateNode(json(body)?),
            MessageType::RequestUpdatePartition => Payload::UpdatePartition(json(body)?),
            MessageType::RequestDeletePartition => Payload::DeletePartition(json(body)?),
            MessageType::RequestSubmitBatchJob => Payload::SubmitBatchJob(json(body)?),
            MessageType::ResponseSubmitBatchJob => Payload::SubmitBatchJobResponse(json(body)?),
            MessageType::RequestCancelJob => Payload::CancelJob(json(body)?),
            MessageType::ResponseSlurmRc => Payload::ReturnCode(json(body)?),
        };
        Ok(payload)
    }
}

// ── Envelope ──────────────────────────────────────────────────────

/// A message plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub payload: Payload,
    /// Filled in by the receiving side from the socket's peer address.
    pub source: Option<SocketAddr>,
}

impl Envelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            source: None,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}
