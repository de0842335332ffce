//! A single loaded plugin.
//!
//! # Lifecycle
//!
//! ```text
//! Plugin::load(path)
//!   → dlopen(RTLD_LAZY)                     fail → Open
//!   → plugin_name / plugin_type / version   missing → NotAPlugin
//!   → init()  (optional)                    nonzero → InitFailed, library closed
//!   → Plugin                                (fully valid, never partial)
//!
//! Plugin::unload / drop
//!   → fini()  (optional) → dlclose          exactly once
//! ```

use std::ffi::{c_char, c_int, CStr};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::library::{Library, Symbol};

type InitFn = unsafe extern "C" fn() -> c_int;
type FiniFn = unsafe extern "C" fn();

/// Identity of a plugin as read from its exported symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    /// `"<major>/<variant>"`, e.g. `sched/backfill`.
    pub plugin_type: String,
    pub version: u32,
    pub path: PathBuf,
}

impl PluginInfo {
    /// The part of the type tag before `/` (`sched`, `select`, ...).
    pub fn major_type(&self) -> &str {
        self.plugin_type
            .split_once('/')
            .map_or(self.plugin_type.as_str(), |(major, _)| major)
    }
}

/// A validated, initialized plugin. Owns its library handle; not `Clone`.
#[derive(Debug)]
pub struct Plugin {
    info: PluginInfo,
    lib: Option<Library>,
}

impl Plugin {
    /// Read a plugin's identity without calling `init` or `fini`.
    pub fn peek(path: &Path) -> PluginResult<PluginInfo> {
        let lib = open(path)?;
        read_info(&lib, path)
    }

    /// Load, validate, and initialize a plugin.
    pub fn load(path: &Path) -> PluginResult<Self> {
        let lib = open(path)?;
        let info = read_info(&lib, path)?;

        if let Some(init) = lib.symbol("init") {
            // SAFETY: the plugin ABI declares `int init(void)`.
            let code = unsafe {
                let init: InitFn = std::mem::transmute(init.as_ptr());
                init()
            };
            if code != 0 {
                warn!(plugin_type = %info.plugin_type, code, "plugin init failed");
                return Err(PluginError::InitFailed {
                    plugin_type: info.plugin_type,
                    code,
                });
            }
        }

        info!(
            name = %info.name,
            plugin_type = %info.plugin_type,
            version = info.version,
            path = %path.display(),
            "plugin loaded"
        );
        Ok(Self {
            info,
            lib: Some(lib),
        })
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn plugin_type(&self) -> &str {
        &self.info.plugin_type
    }

    pub fn version(&self) -> u32 {
        self.info.version
    }

    /// Resolve one exported symbol.
    pub fn symbol(&self, name: &str) -> Option<Symbol> {
        self.lib.as_ref()?.symbol(name)
    }

    /// Resolve several symbols at once, returning each result in order and
    /// the number that resolved.
    pub fn symbols(&self, names: &[&str]) -> (Vec<Option<Symbol>>, usize) {
        let resolved: Vec<Option<Symbol>> = names.iter().map(|n| self.symbol(n)).collect();
        let count = resolved.iter().filter(|s| s.is_some()).count();
        (resolved, count)
    }

    /// Run `fini` and release the library.
    pub fn unload(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(lib) = self.lib.take() else {
            return;
        };
        if let Some(fini) = lib.symbol("fini") {
            // SAFETY: the plugin ABI declares `void fini(void)`.
            unsafe {
                let fini: FiniFn = std::mem::transmute(fini.as_ptr());
                fini();
            }
        }
        drop(lib);
        debug!(plugin_type = %self.info.plugin_type, "plugin unloaded");
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        self.release();
    }
}

fn open(path: &Path) -> PluginResult<Library> {
    Library::open_lazy(path).map_err(|reason| PluginError::Open {
        path: path.to_path_buf(),
        reason,
    })
}

fn read_info(lib: &Library, path: &Path) -> PluginResult<PluginInfo> {
    let not_a_plugin = |missing: &'static str| {
        debug!(path = %path.display(), missing, "library is not a plugin");
        PluginError::NotAPlugin {
            path: path.to_path_buf(),
            missing,
        }
    };

    let name = lib.symbol("plugin_name").ok_or_else(|| not_a_plugin("plugin_name"))?;
    let plugin_type = lib.symbol("plugin_type").ok_or_else(|| not_a_plugin("plugin_type"))?;
    let version = lib
        .symbol("plugin_version")
        .ok_or_else(|| not_a_plugin("plugin_version"))?;

    // SAFETY: the plugin ABI exports NUL-terminated char arrays for the
    // name and type, and a `uint32_t` for the version.
    let (name, plugin_type, version) = unsafe {
        (
            CStr::from_ptr(name.as_ptr() as *const c_char)
                .to_string_lossy()
                .into_owned(),
            CStr::from_ptr(plugin_type.as_ptr() as *const c_char)
                .to_string_lossy()
                .into_owned(),
            *(version.as_ptr() as *const u32),
        )
    };

    Ok(PluginInfo {
        name,
        plugin_type,
        version,
        path: path.to_path_buf(),
    })
}
