//! Plugin error types.

use std::path::PathBuf;

use corral_core::errno;
use thiserror::Error;

/// Result type alias for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors that can occur while loading or resolving plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("cannot open plugin {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },

    /// The library opened fine but lacks the plugin identity symbols.
    /// Expected for unrelated libraries sharing the plugin directory.
    #[error("{} is not a plugin (missing `{missing}`)", .path.display())]
    NotAPlugin {
        path: PathBuf,
        missing: &'static str,
    },

    #[error("plugin {plugin_type} init failed with code {code}")]
    InitFailed { plugin_type: String, code: i32 },

    #[error("plugin {plugin_type} is missing required symbol `{symbol}`")]
    SymbolMissing { plugin_type: String, symbol: String },

    #[error("plugin type {0} is already active")]
    AlreadyActive(String),

    #[error("no plugin of type {0} found")]
    NotFound(String),
}

impl PluginError {
    pub fn code(&self) -> i32 {
        match self {
            PluginError::Open { .. } => errno::PLUGIN_OPEN_ERROR,
            PluginError::NotAPlugin { .. } => errno::PLUGIN_NOT_A_PLUGIN,
            PluginError::InitFailed { .. } => errno::PLUGIN_INIT_FAILED,
            PluginError::SymbolMissing { .. } => errno::PLUGIN_SYMBOL_MISSING,
            PluginError::AlreadyActive(_) => errno::PLUGIN_ALREADY_ACTIVE,
            PluginError::NotFound(_) => errno::PLUGIN_NOT_FOUND,
        }
    }
}
