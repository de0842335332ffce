//! Shared types used across Corral crates.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Sentinel for "no value supplied" in numeric request fields.
pub const NO_VAL: u32 = 0xffff_fffe;

/// `show_flags` bit: include records from hidden partitions.
pub const SHOW_ALL: u16 = 0x0001;

/// Unique identifier for a job.
pub type JobId = u32;

/// Unique identifier for a trigger.
pub type TriggerId = u32;

// ── Controller role ───────────────────────────────────────────────

/// Which controller of a dual-controller pair a command is addressed to.
///
/// This is an addressing target only; failover itself happens elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerRole {
    Primary,
    Secondary,
}

impl ControllerRole {
    /// Map the classic numeric role argument (1 = primary, 2 = secondary).
    pub fn from_index(index: i32) -> Option<Self> {
        match index {
            1 => Some(ControllerRole::Primary),
            2 => Some(ControllerRole::Secondary),
            _ => None,
        }
    }
}

impl fmt::Display for ControllerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerRole::Primary => write!(f, "primary"),
            ControllerRole::Secondary => write!(f, "secondary"),
        }
    }
}

impl FromStr for ControllerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "1" => Ok(ControllerRole::Primary),
            "secondary" | "backup" | "2" => Ok(ControllerRole::Secondary),
            other => Err(format!("unknown controller role: {other}")),
        }
    }
}

// ── Job / node state ──────────────────────────────────────────────

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Cancelled)
    }
}

/// Administrative/allocation state of a compute node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Idle,
    Mixed,
    Allocated,
    Drain,
    Down,
}

impl NodeState {
    /// Whether new work may be placed on a node in this state.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, NodeState::Idle | NodeState::Mixed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Idle => "idle",
            NodeState::Mixed => "mixed",
            NodeState::Allocated => "allocated",
            NodeState::Drain => "drain",
            NodeState::Down => "down",
        };
        f.write_str(s)
    }
}

// ── Resource request ──────────────────────────────────────────────

/// A job's per-node topology constraints.
///
/// Any field ≤ 0 means "unconstrained"; the allocation engine normalizes
/// those before packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequest {
    pub max_sockets: i32,
    pub max_cores: i32,
    pub max_threads: i32,
    pub cpus_per_task: i32,
}

// ── Triggers ──────────────────────────────────────────────────────

/// What a trigger watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum TriggerResource {
    Job(JobId),
    Node(String),
}

/// The event that fires a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    Up,
    Down,
    Drained,
    Idle,
    Fini,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_from_index() {
        assert_eq!(ControllerRole::from_index(1), Some(ControllerRole::Primary));
        assert_eq!(ControllerRole::from_index(2), Some(ControllerRole::Secondary));
        assert_eq!(ControllerRole::from_index(0), None);
        assert_eq!(ControllerRole::from_index(3), None);
    }

    #[test]
    fn role_parse() {
        assert_eq!("Primary".parse::<ControllerRole>(), Ok(ControllerRole::Primary));
        assert_eq!("backup".parse::<ControllerRole>(), Ok(ControllerRole::Secondary));
        assert!("tertiary".parse::<ControllerRole>().is_err());
    }

    #[test]
    fn node_state_schedulable() {
        assert!(NodeState::Idle.is_schedulable());
        assert!(NodeState::Mixed.is_schedulable());
        assert!(!NodeState::Allocated.is_schedulable());
        assert!(!NodeState::Drain.is_schedulable());
        assert!(!NodeState::Down.is_schedulable());
    }
}
