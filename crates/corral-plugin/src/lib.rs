//! corral-plugin — runtime-loadable policy modules.
//!
//! A plugin is a shared library exporting `plugin_name`, `plugin_type`
//! (`"<major>/<variant>"`, e.g. `sched/backfill`) and `plugin_version`,
//! plus optional `init`/`fini` hooks and an operation table specific to
//! its major type.
//!
//! # Components
//!
//! - **`library`** — thin owning wrapper around `dlopen`/`dlsym`/`dlclose`
//! - **`plugin`** — a validated, initialized plugin ([`Plugin`]) and
//!   side-effect-free inspection ([`Plugin::peek`])
//! - **`registry`** — plugins keyed by type tag, directory discovery, and
//!   operation-table contexts ([`PluginContext`])

pub mod error;
mod library;
pub mod plugin;
pub mod registry;

pub use error::{PluginError, PluginResult};
pub use library::Symbol;
pub use plugin::{Plugin, PluginInfo};
pub use registry::{PluginContext, PluginRegistry};
