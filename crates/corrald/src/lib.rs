//! corrald — the Corral cluster controller.
//!
//! # Architecture
//!
//! ```text
//! RpcServer (thread per connection)
//!   → handlers::dispatch(Envelope) → Payload
//!     → ControllerState (jobs, nodes, partitions, triggers)
//!         ├─ marks dirty → SaveCoordinator → StateCheckpointer → redb
//!         └─ fired triggers → trigger programs
//!     → SchedDriver → SchedulingPolicy → ControllerState::run_pass
//!                                          → ResourceSelector::select
//! ```
//!
//! [`ControllerCore::start`] recovers saved state, then brings up
//! persistence, the scheduling policy and the listener in that order;
//! [`ControllerCore::shutdown`] tears them down in reverse.

pub mod checkpoint;
pub mod controller;
pub mod error;
mod handlers;
pub mod server;
pub mod state;
pub mod triggers;

pub use controller::ControllerCore;
pub use error::{ControllerError, ControllerResult};
pub use state::{ControllerState, SavedState};
