//! corral-state — durable controller state.
//!
//! Backed by [redb](https://docs.rs/redb). Controller state is split into
//! four categories (jobs, nodes, partitions, triggers), each checkpointed
//! wholesale into its own table.
//!
//! # Architecture
//!
//! ```text
//! mutating thread ──schedule_*_save()──▶ dirty counters (Mutex + Condvar)
//!                                               │
//!                               persistence thread wakes, takes & zeroes
//!                                               │
//!                          Checkpoint::checkpoint(category) ──▶ StateStore
//! ```
//!
//! Many dirty marks before the thread wakes collapse into one write.

pub mod coordinator;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use coordinator::{Checkpoint, SaveCoordinator, StateCategory};
pub use error::{PersistenceError, StateError, StateResult};
pub use store::StateStore;
pub use types::*;
