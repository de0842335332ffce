//! Persisted controller records.
//!
//! These are the durable shape of controller state; the live in-memory
//! tables in `corrald` convert to and from them at checkpoint and
//! recovery time.

use std::fmt;

use corral_core::config::{NodeConfig, PartitionConfig};
use corral_core::{
    JobId, JobState, NodeState, ResourceRequest, TriggerEvent, TriggerId, TriggerResource,
};
use serde::{Deserialize, Serialize};

// ── Jobs ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub job_id: JobId,
    pub name: String,
    pub partition: String,
    pub num_cpus: u32,
    #[serde(default)]
    pub resources: ResourceRequest,
    /// 0 means held.
    pub priority: u32,
    pub state: JobState,
    /// Node the job runs on, once started.
    pub node: Option<String>,
    /// CPUs charged to `node`.
    #[serde(default)]
    pub alloc_cpus: u32,
    /// Sockets charged to `node`.
    #[serde(default)]
    pub alloc_sockets: u32,
    pub submit_time: u64,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
}

impl JobRecord {
    pub fn table_key(&self) -> String {
        self.job_id.to_string()
    }

    pub fn is_held(&self) -> bool {
        self.state == JobState::Pending && self.priority == 0
    }
}

// ── Nodes ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub state: NodeState,
    /// Why an operator drained or downed the node.
    pub reason: Option<String>,
    pub cpus: u32,
    pub sockets: u32,
    pub cores_per_socket: u32,
    pub threads_per_core: u32,
    pub alloc_cpus: u32,
    pub alloc_sockets: u32,
}

impl NodeRecord {
    pub fn table_key(&self) -> String {
        self.name.clone()
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            name: config.name.clone(),
            state: NodeState::Idle,
            reason: None,
            cpus: config.cpus,
            sockets: config.sockets,
            cores_per_socket: config.cores_per_socket,
            threads_per_core: config.threads_per_core,
            alloc_cpus: 0,
            alloc_sockets: 0,
        }
    }
}

// ── Partitions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionRecord {
    pub name: String,
    /// Member nodes in selection order.
    pub nodes: Vec<String>,
    pub default: bool,
    pub hidden: bool,
    pub state_up: bool,
}

impl PartitionRecord {
    pub fn table_key(&self) -> String {
        self.name.clone()
    }
}

impl From<&PartitionConfig> for PartitionRecord {
    fn from(config: &PartitionConfig) -> Self {
        Self {
            name: config.name.clone(),
            nodes: config.nodes.clone(),
            default: config.default,
            hidden: config.hidden,
            state_up: config.state_up,
        }
    }
}

// ── Triggers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerRecord {
    pub trigger_id: TriggerId,
    pub resource: TriggerResource,
    pub event: TriggerEvent,
    /// Program run when the trigger fires.
    pub program: String,
    pub created_at: u64,
}

impl TriggerRecord {
    pub fn table_key(&self) -> String {
        self.trigger_id.to_string()
    }
}

impl fmt::Display for TriggerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            TriggerResource::Job(id) => write!(f, "trigger {} on job {id} {:?}", self.trigger_id, self.event),
            TriggerResource::Node(name) => {
                write!(f, "trigger {} on node {name} {:?}", self.trigger_id, self.event)
            }
        }
    }
}
