//! corral.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub cluster_name: String,
    /// Address the RPC service binds to.
    pub listen_addr: String,
    pub controllers: ControllersConfig,
    /// Directory scanned for loadable policy plugins.
    pub plugin_dir: PathBuf,
    /// Active scheduling policy, e.g. `sched/backfill`.
    pub sched_type: String,
    /// Active resource selector, e.g. `select/cons_res`.
    pub select_type: String,
    /// Consumable-resource policy for `select/cons_res` (`CR_Socket`, `CR_Core`, `CR_CPU`).
    pub select_type_parameters: String,
    /// Directory holding the checkpoint database.
    pub state_save_location: PathBuf,
    pub msg_timeout_secs: u64,
    pub backfill_interval_secs: u64,
    /// While this file exists, `sched/hold` holds every new job.
    pub hold_file: Option<PathBuf>,
    pub max_priority: u32,
    pub log_format: LogFormat,
    pub nodes: Vec<NodeConfig>,
    pub partitions: Vec<PartitionConfig>,
}

/// Addresses of the dual-controller pair (`host:port`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllersConfig {
    pub primary: String,
    pub secondary: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Static description of a compute node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub cpus: u32,
    #[serde(default = "one")]
    pub sockets: u32,
    #[serde(default = "one")]
    pub cores_per_socket: u32,
    #[serde(default = "one")]
    pub threads_per_core: u32,
}

/// Static description of a partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionConfig {
    pub name: String,
    pub nodes: Vec<String>,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default = "yes")]
    pub state_up: bool,
}

fn one() -> u32 {
    1
}

fn yes() -> bool {
    true
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_name: "corral".to_string(),
            listen_addr: "0.0.0.0:6817".to_string(),
            controllers: ControllersConfig::default(),
            plugin_dir: PathBuf::from("/usr/lib/corral"),
            sched_type: "sched/builtin".to_string(),
            select_type: "select/cons_res".to_string(),
            select_type_parameters: "CR_CPU".to_string(),
            state_save_location: PathBuf::from("/var/lib/corral"),
            msg_timeout_secs: 10,
            backfill_interval_secs: 30,
            hold_file: None,
            max_priority: 0xffff_fffe,
            log_format: LogFormat::Text,
            nodes: Vec::new(),
            partitions: Vec::new(),
        }
    }
}

impl Default for ControllersConfig {
    fn default() -> Self {
        Self {
            primary: "127.0.0.1:6817".to_string(),
            secondary: None,
        }
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ControllerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn msg_timeout(&self) -> Duration {
        Duration::from_secs(self.msg_timeout_secs.max(1))
    }

    pub fn backfill_interval(&self) -> Duration {
        Duration::from_secs(self.backfill_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config: ControllerConfig = toml::from_str("cluster_name = \"lab\"\n").unwrap();
        assert_eq!(config.cluster_name, "lab");
        assert_eq!(config.sched_type, "sched/builtin");
        assert_eq!(config.select_type, "select/cons_res");
        assert!(config.controllers.secondary.is_none());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
cluster_name = "hpc"
sched_type = "sched/backfill"
select_type_parameters = "CR_Socket"
hold_file = "/etc/corral/hold"
log_format = "json"

[controllers]
primary = "ctl1:6817"
secondary = "ctl2:6817"

[[nodes]]
name = "n1"
cpus = 8
sockets = 2
cores_per_socket = 4

[[nodes]]
name = "n2"
cpus = 4

[[partitions]]
name = "batch"
nodes = ["n1", "n2"]
default = true
"#;
        let config: ControllerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.controllers.secondary.as_deref(), Some("ctl2:6817"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].sockets, 2);
        assert_eq!(config.nodes[1].threads_per_core, 1);
        assert!(config.partitions[0].state_up);
        assert!(config.partitions[0].default);
    }

    #[test]
    fn test_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corral.toml");
        let config = ControllerConfig::default();
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(ControllerConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn zero_timeouts_are_floored() {
        let config = ControllerConfig {
            msg_timeout_secs: 0,
            backfill_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.msg_timeout(), Duration::from_secs(1));
        assert_eq!(config.backfill_interval(), Duration::from_secs(1));
    }
}
