//! corral-select — consumable-resource accounting and node selection.
//!
//! This crate answers "how many CPUs on this node can this job use" under
//! a consumable-resource policy, and picks a node for a job. It does NOT
//! track node state or job queues (that's `corrald`).
//!
//! # Components
//!
//! - **`engine`** — the pure `available_cpus` computation per [`CrPolicy`]
//! - **`selector`** — [`ResourceSelector`] implementations (`select/cons_res`,
//!   `select/linear`) over per-node [`NodeResources`]

pub mod engine;
pub mod error;
pub mod selector;

pub use engine::{Allocated, CrPolicy, ResourceAvailability, available_cpus};
pub use error::{ResourceAccountingError, SelectError, SelectResult};
pub use selector::{ConsRes, Linear, NodeResources, Placement, ResourceSelector, selector_for};
