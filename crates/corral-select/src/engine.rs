//! Available-CPU computation under a consumable-resource policy.
//!
//! All arithmetic is integer with floor division. Request fields `<= 0`
//! mean "no limit" (`cpus_per_task` means 1).

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use corral_core::ResourceRequest;
use serde::{Deserialize, Serialize};

use crate::error::ResourceAccountingError;

/// Which resources a job consumes exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrPolicy {
    /// Whole sockets are consumed.
    Socket,
    /// Whole cores are consumed. Not implemented: no CPUs are ever available.
    Core,
    /// Flat logical processors with no topology.
    Default,
    /// Socket packing against full capacity, ignoring prior allocations.
    LinearFallback,
}

impl FromStr for CrPolicy {
    type Err = Infallible;

    /// Unrecognized parameters fall back to [`CrPolicy::LinearFallback`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "CR_Socket" | "CR_Socket_Memory" => CrPolicy::Socket,
            "CR_Core" | "CR_Core_Memory" => CrPolicy::Core,
            "CR_CPU" | "CR_CPU_Memory" | "" => CrPolicy::Default,
            _ => CrPolicy::LinearFallback,
        })
    }
}

impl fmt::Display for CrPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrPolicy::Socket => write!(f, "CR_Socket"),
            CrPolicy::Core => write!(f, "CR_Core"),
            CrPolicy::Default => write!(f, "CR_CPU"),
            CrPolicy::LinearFallback => write!(f, "linear"),
        }
    }
}

/// A node's capacity, updated in place by [`available_cpus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceAvailability {
    pub cpus: u32,
    pub sockets: u32,
    /// Cores per socket.
    pub cores: u32,
    /// Threads per core.
    pub threads: u32,
}

/// Resources already charged to running jobs on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Allocated {
    pub sockets: u32,
    pub cpus: u32,
}

/// Request limits after normalization.
#[derive(Debug, Clone, Copy)]
struct Limits {
    max_sockets: u32,
    max_cores: u32,
    max_threads: u32,
    cpus_per_task: u32,
}

impl Limits {
    fn from_request(req: &ResourceRequest) -> Self {
        let unbounded = |v: i32| if v <= 0 { u32::MAX } else { v as u32 };
        Self {
            max_sockets: unbounded(req.max_sockets),
            max_cores: unbounded(req.max_cores),
            max_threads: unbounded(req.max_threads),
            cpus_per_task: if req.cpus_per_task <= 0 {
                1
            } else {
                req.cpus_per_task as u32
            },
        }
    }
}

/// Number of CPUs on a node usable by a job with `request`.
///
/// `capacity` is left holding the post-subtraction, post-clamp values the
/// result was computed from. An allocation larger than capacity is an
/// accounting error and is never clamped.
pub fn available_cpus(
    request: &ResourceRequest,
    capacity: &mut ResourceAvailability,
    allocated: Allocated,
    policy: CrPolicy,
) -> Result<u32, ResourceAccountingError> {
    let limits = Limits::from_request(request);

    for topo in [&mut capacity.sockets, &mut capacity.cores, &mut capacity.threads] {
        if *topo == 0 {
            *topo = 1;
        }
    }

    match policy {
        CrPolicy::Socket => {
            capacity.sockets = subtract("sockets", capacity.sockets, allocated.sockets)?;
            capacity.cpus = subtract("cpus", capacity.cpus, allocated.cpus)?;
            Ok(socket_pack(capacity, &limits))
        }
        CrPolicy::Core => Ok(0),
        CrPolicy::Default => {
            capacity.cpus = subtract("cpus", capacity.cpus, allocated.cpus)?;
            capacity.cpus = round_down(capacity.cpus, limits.cpus_per_task);
            Ok(capacity.cpus)
        }
        CrPolicy::LinearFallback => Ok(socket_pack(capacity, &limits)),
    }
}

fn subtract(resource: &'static str, capacity: u32, allocated: u32) -> Result<u32, ResourceAccountingError> {
    capacity.checked_sub(allocated).ok_or(ResourceAccountingError {
        resource,
        capacity,
        allocated,
    })
}

fn round_down(value: u32, multiple: u32) -> u32 {
    value - value % multiple
}

fn socket_pack(cap: &mut ResourceAvailability, limits: &Limits) -> u32 {
    let cpt = limits.cpus_per_task;
    cap.cpus = round_down(cap.cpus, cpt);

    cap.sockets = cap.sockets.min(limits.max_sockets);
    cap.cores = cap.cores.min(limits.max_cores);
    cap.threads = cap.threads.min(limits.max_threads);

    let lps = u64::from(cap.sockets) * u64::from(cap.cores) * u64::from(cap.threads);
    let ceiling = lps / u64::from(cpt) * u64::from(cpt);
    u64::from(cap.cpus).min(ceiling) as u32
}
