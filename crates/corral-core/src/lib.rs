//! corral-core — types shared by every Corral crate.
//!
//! - **`config`** — `corral.toml` parsing into [`ControllerConfig`]
//! - **`errno`** — integer error codes and their operator-facing strings
//! - **`types`** — controller roles, job/node states, wire sentinels

pub mod config;
pub mod errno;
pub mod types;

pub use config::ControllerConfig;
pub use types::*;
