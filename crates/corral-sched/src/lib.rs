//! corral-sched — hot-swappable scheduling policies.
//!
//! A policy decides when pending jobs are started and what priority new
//! jobs get. It does NOT pick nodes (that's `corral-select`); it calls
//! back into the controller through [`SchedulerHost`] to run passes.
//!
//! # Architecture
//!
//! ```text
//! SchedDriver  (Unloaded → Initializing → Running → ShuttingDown)
//!   ├── Arc<dyn SchedulingPolicy>
//!   │     ├── built-in: builtin / backfill / hold / wiki
//!   │     └── DynamicPolicy → PluginContext → C operation table
//!   └── agent thread (optional) + CancelToken
//! ```

pub mod builtin;
pub mod cancel;
pub mod driver;
pub mod dynamic;
pub mod error;
pub mod policy;

pub use builtin::{Backfill, Builtin, Hold, PolicyOptions, Wiki, policy_for};
pub use cancel::CancelToken;
pub use driver::{DriverState, SchedDriver};
pub use dynamic::DynamicPolicy;
pub use error::{SchedError, SchedResult};
pub use policy::{Agent, SchedulerHost, SchedulingPolicy, default_initial_priority};
