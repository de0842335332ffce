//! Registry of loaded plugins, keyed by type tag.
//!
//! Load, unload, and context creation all take the same lock, so a
//! context is never built against a plugin that is halfway through
//! loading or unloading.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::error::{PluginError, PluginResult};
use crate::library::Symbol;
use crate::plugin::Plugin;

#[derive(Default)]
struct Inner {
    loaded: HashMap<String, Arc<Plugin>>,
    /// type tag → path, from the last `discover`.
    inventory: HashMap<String, PathBuf>,
}

#[derive(Default)]
pub struct PluginRegistry {
    inner: Mutex<Inner>,
}

/// A resolved operation table for one plugin.
///
/// Holds a reference on the plugin so the library outlives every symbol
/// handed out here.
#[derive(Debug, Clone)]
pub struct PluginContext {
    plugin: Arc<Plugin>,
    ops: HashMap<String, Symbol>,
}

impl PluginContext {
    pub fn plugin(&self) -> &Plugin {
        &self.plugin
    }

    pub fn plugin_type(&self) -> &str {
        self.plugin.plugin_type()
    }

    /// A required operation resolved at creation time.
    pub fn op(&self, name: &str) -> Option<Symbol> {
        self.ops.get(name).copied()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("plugin registry lock poisoned")
    }

    /// Scan `dir` and record the type tag of every plugin found. Returns the
    /// number of plugins in the inventory afterwards.
    pub fn discover(&self, dir: &Path) -> PluginResult<usize> {
        let entries = std::fs::read_dir(dir).map_err(|e| PluginError::Open {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut found = HashMap::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            match Plugin::peek(&path) {
                Ok(info) => {
                    debug!(plugin_type = %info.plugin_type, path = %path.display(), "found plugin");
                    found.entry(info.plugin_type).or_insert(path);
                }
                Err(PluginError::NotAPlugin { .. }) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "skipping plugin candidate"),
            }
        }

        let mut inner = self.lock();
        inner.inventory = found;
        info!(dir = %dir.display(), count = inner.inventory.len(), "plugin discovery complete");
        Ok(inner.inventory.len())
    }

    /// Discovered type tags, sorted.
    pub fn inventory(&self) -> Vec<String> {
        let mut types: Vec<String> = self.lock().inventory.keys().cloned().collect();
        types.sort();
        types
    }

    /// Load the library at `path` and register it under its type tag.
    pub fn load(&self, path: &Path) -> PluginResult<Arc<Plugin>> {
        let mut inner = self.lock();
        Self::load_locked(&mut inner, path)
    }

    fn load_locked(inner: &mut Inner, path: &Path) -> PluginResult<Arc<Plugin>> {
        // Check the type before running init so an active plugin never
        // sees a second init from a duplicate.
        let info = Plugin::peek(path)?;
        if inner.loaded.contains_key(&info.plugin_type) {
            return Err(PluginError::AlreadyActive(info.plugin_type));
        }
        let plugin = Arc::new(Plugin::load(path)?);
        inner
            .loaded
            .insert(plugin.plugin_type().to_string(), Arc::clone(&plugin));
        Ok(plugin)
    }

    /// Load a discovered plugin by type tag.
    pub fn load_type(&self, plugin_type: &str) -> PluginResult<Arc<Plugin>> {
        let mut inner = self.lock();
        let path = inner
            .inventory
            .get(plugin_type)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(plugin_type.to_string()))?;
        Self::load_locked(&mut inner, &path)
    }

    pub fn get(&self, plugin_type: &str) -> Option<Arc<Plugin>> {
        self.lock().loaded.get(plugin_type).cloned()
    }

    pub fn loaded_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.lock().loaded.keys().cloned().collect();
        types.sort();
        types
    }

    /// Drop the registry's reference. The library is released once every
    /// outstanding context is destroyed too. Returns whether anything was
    /// registered under `plugin_type`.
    pub fn unload(&self, plugin_type: &str) -> bool {
        let removed = self.lock().loaded.remove(plugin_type);
        match removed {
            Some(plugin) => {
                if Arc::strong_count(&plugin) > 1 {
                    warn!(%plugin_type, "plugin unloaded with live contexts");
                }
                info!(%plugin_type, "plugin unregistered");
                true
            }
            None => false,
        }
    }

    /// Resolve `ops` for the registered plugin of `plugin_type`.
    pub fn context_create(&self, plugin_type: &str, ops: &[&str]) -> PluginResult<PluginContext> {
        let inner = self.lock();
        let plugin = inner
            .loaded
            .get(plugin_type)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(plugin_type.to_string()))?;

        let (resolved, count) = plugin.symbols(ops);
        if count != ops.len() {
            let missing = ops
                .iter()
                .zip(&resolved)
                .find(|(_, s)| s.is_none())
                .map(|(name, _)| name.to_string())
                .unwrap_or_default();
            return Err(PluginError::SymbolMissing {
                plugin_type: plugin_type.to_string(),
                symbol: missing,
            });
        }

        let ops = ops
            .iter()
            .zip(resolved)
            .filter_map(|(name, sym)| sym.map(|s| (name.to_string(), s)))
            .collect();
        debug!(%plugin_type, "plugin context created");
        Ok(PluginContext { plugin, ops })
    }

    /// Release a context under the registry lock.
    pub fn context_destroy(&self, ctx: PluginContext) {
        let _inner = self.lock();
        let plugin_type = ctx.plugin_type().to_string();
        drop(ctx);
        debug!(%plugin_type, "plugin context destroyed");
    }
}
