//! Node selection.
//!
//! A [`ResourceSelector`] turns a node's topology and current allocation
//! into an available-CPU count, and picks the first node in the given
//! order that can hold a job.
//!
//! # Selectors
//!
//! ```text
//! select/cons_res   engine with the configured CR policy; jobs share nodes
//! select/linear     whole idle nodes only; a job takes every CPU
//! ```

use corral_core::ResourceRequest;
use tracing::{debug, error};

use crate::engine::{Allocated, CrPolicy, ResourceAvailability, available_cpus};
use crate::error::{SelectError, SelectResult};

/// Topology and current allocation of one schedulable node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResources {
    pub name: String,
    pub cpus: u32,
    pub sockets: u32,
    pub cores_per_socket: u32,
    pub threads_per_core: u32,
    pub alloc_cpus: u32,
    pub alloc_sockets: u32,
}

impl NodeResources {
    pub fn capacity(&self) -> ResourceAvailability {
        ResourceAvailability {
            cpus: self.cpus,
            sockets: self.sockets,
            cores: self.cores_per_socket,
            threads: self.threads_per_core,
        }
    }

    pub fn allocated(&self) -> Allocated {
        Allocated {
            sockets: self.alloc_sockets,
            cpus: self.alloc_cpus,
        }
    }

    fn lps_per_socket(&self) -> u32 {
        self.cores_per_socket.max(1) * self.threads_per_core.max(1)
    }
}

/// Where a job goes and what it is charged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Index into the candidate slice.
    pub index: usize,
    pub node: String,
    pub charge: Allocated,
}

pub trait ResourceSelector: Send + Sync {
    /// Type tag, e.g. `select/cons_res`.
    fn select_type(&self) -> &'static str;

    /// CPUs on `node` a job with `request` could use right now.
    ///
    /// Aborts the process if the node's allocation exceeds its capacity.
    fn available_cpus(&self, node: &NodeResources, request: &ResourceRequest) -> u32;

    /// What placing `num_cpus` on `node` consumes.
    fn charge_for(&self, node: &NodeResources, num_cpus: u32) -> Allocated;

    /// First node, in the order given, that can hold `num_cpus`.
    fn select(
        &self,
        nodes: &[NodeResources],
        num_cpus: u32,
        request: &ResourceRequest,
    ) -> Option<Placement> {
        let num_cpus = num_cpus.max(1);
        nodes.iter().enumerate().find_map(|(index, node)| {
            let avail = self.available_cpus(node, request);
            (avail >= num_cpus).then(|| Placement {
                index,
                node: node.name.clone(),
                charge: self.charge_for(node, num_cpus),
            })
        })
    }
}

/// Consumable-resource selection: jobs share nodes down to the unit the
/// policy names.
#[derive(Debug, Clone, Copy)]
pub struct ConsRes {
    policy: CrPolicy,
}

impl ConsRes {
    pub fn new(policy: CrPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> CrPolicy {
        self.policy
    }
}

impl ResourceSelector for ConsRes {
    fn select_type(&self) -> &'static str {
        "select/cons_res"
    }

    fn available_cpus(&self, node: &NodeResources, request: &ResourceRequest) -> u32 {
        accounted(node, request, self.policy)
    }

    fn charge_for(&self, node: &NodeResources, num_cpus: u32) -> Allocated {
        let sockets = match self.policy {
            CrPolicy::Socket => num_cpus.div_ceil(node.lps_per_socket()),
            _ => 0,
        };
        Allocated {
            sockets,
            cpus: num_cpus,
        }
    }
}

/// Whole-node selection: a node is either idle and fully available, or
/// unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl ResourceSelector for Linear {
    fn select_type(&self) -> &'static str {
        "select/linear"
    }

    fn available_cpus(&self, node: &NodeResources, request: &ResourceRequest) -> u32 {
        if node.alloc_cpus > 0 || node.alloc_sockets > 0 {
            return 0;
        }
        accounted(node, request, CrPolicy::LinearFallback)
    }

    fn charge_for(&self, node: &NodeResources, _num_cpus: u32) -> Allocated {
        Allocated {
            sockets: node.sockets.max(1),
            cpus: node.cpus,
        }
    }
}

/// Build the selector named by `select_type`.
pub fn selector_for(select_type: &str, parameters: &str) -> SelectResult<Box<dyn ResourceSelector>> {
    match select_type {
        "select/cons_res" => {
            let policy: CrPolicy = parameters.parse().unwrap_or(CrPolicy::LinearFallback);
            debug!(%select_type, %policy, "resource selector configured");
            Ok(Box::new(ConsRes::new(policy)))
        }
        "select/linear" => Ok(Box::new(Linear)),
        other => Err(SelectError::UnknownType(other.to_string())),
    }
}

/// Run the engine; an accounting violation ends the process.
fn accounted(node: &NodeResources, request: &ResourceRequest, policy: CrPolicy) -> u32 {
    let mut capacity = node.capacity();
    match available_cpus(request, &mut capacity, node.allocated(), policy) {
        Ok(n) => n,
        Err(e) => {
            error!(
                node = %node.name,
                cpus = node.cpus,
                sockets = node.sockets,
                cores_per_socket = node.cores_per_socket,
                threads_per_core = node.threads_per_core,
                alloc_cpus = node.alloc_cpus,
                alloc_sockets = node.alloc_sockets,
                ?request,
                %policy,
                error = %e,
                "resource accounting corrupted"
            );
            corrupted(&node.name, &e)
        }
    }
}

/// The two accounting paths have diverged; no later answer can be trusted.
#[cfg(not(test))]
fn corrupted(_node: &str, _error: &crate::error::ResourceAccountingError) -> ! {
    std::process::abort()
}

#[cfg(test)]
fn corrupted(node: &str, error: &crate::error::ResourceAccountingError) -> ! {
    panic!("resource accounting corrupted on node {node}: {error}")
}
