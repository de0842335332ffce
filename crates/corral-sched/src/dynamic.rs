//! Scheduling policies loaded from shared libraries.
//!
//! The plugin exports the operation table below; `init`/`fini` are run
//! by the plugin loader itself.
//!
//! ```text
//! int       schedule(void);
//! uint32_t  initial_priority(uint32_t max_priority);
//! void      job_is_pending(void);
//! int       get_errno(void);
//! char     *strerror(int code);      /* may return NULL */
//! ```

use std::ffi::{CStr, c_char, c_int};
use std::sync::{Arc, Mutex};

use corral_core::errno;
use corral_plugin::{PluginContext, PluginRegistry};
use tracing::{debug, warn};

use crate::error::SchedResult;
use crate::policy::{SchedulingPolicy, default_initial_priority};

const OPS: [&str; 5] = [
    "schedule",
    "initial_priority",
    "job_is_pending",
    "get_errno",
    "strerror",
];

type ScheduleFn = unsafe extern "C" fn() -> c_int;
type InitialPriorityFn = unsafe extern "C" fn(u32) -> u32;
type JobIsPendingFn = unsafe extern "C" fn();
type GetErrnoFn = unsafe extern "C" fn() -> c_int;
type StrerrorFn = unsafe extern "C" fn(c_int) -> *const c_char;

/// Function pointers valid for as long as `ctx` is held.
struct OpTable {
    schedule: ScheduleFn,
    initial_priority: InitialPriorityFn,
    job_is_pending: JobIsPendingFn,
    get_errno: GetErrnoFn,
    strerror: StrerrorFn,
    ctx: PluginContext,
}

impl OpTable {
    fn resolve(ctx: PluginContext) -> Option<Self> {
        // SAFETY: each symbol is declared by the scheduling plugin ABI with
        // the signature of the matching type alias.
        unsafe {
            Some(Self {
                schedule: std::mem::transmute::<*mut _, ScheduleFn>(ctx.op(OPS[0])?.as_ptr()),
                initial_priority: std::mem::transmute::<*mut _, InitialPriorityFn>(ctx.op(OPS[1])?.as_ptr()),
                job_is_pending: std::mem::transmute::<*mut _, JobIsPendingFn>(ctx.op(OPS[2])?.as_ptr()),
                get_errno: std::mem::transmute::<*mut _, GetErrnoFn>(ctx.op(OPS[3])?.as_ptr()),
                strerror: std::mem::transmute::<*mut _, StrerrorFn>(ctx.op(OPS[4])?.as_ptr()),
                ctx,
            })
        }
    }
}

/// A [`SchedulingPolicy`] backed by a loaded plugin.
pub struct DynamicPolicy {
    sched_type: String,
    registry: Arc<PluginRegistry>,
    /// This instance loaded the plugin and unregisters it on `fini`.
    owns_registration: bool,
    ops: Mutex<Option<OpTable>>,
}

impl DynamicPolicy {
    /// Load `sched_type` from the registry's inventory (or reuse it if
    /// already loaded) and resolve its operation table.
    pub fn load(registry: Arc<PluginRegistry>, sched_type: &str) -> SchedResult<Self> {
        let owns_registration = registry.get(sched_type).is_none();
        if owns_registration {
            registry.load_type(sched_type)?;
        }
        let ctx = match registry.context_create(sched_type, &OPS) {
            Ok(ctx) => ctx,
            Err(e) => {
                if owns_registration {
                    registry.unload(sched_type);
                }
                return Err(e.into());
            }
        };
        let table = OpTable::resolve(ctx);
        debug!(%sched_type, owns_registration, "dynamic scheduling policy resolved");
        Ok(Self {
            sched_type: sched_type.to_string(),
            registry,
            owns_registration,
            ops: Mutex::new(table),
        })
    }

    fn with_ops<T>(&self, f: impl FnOnce(&OpTable) -> T) -> Option<T> {
        let guard = self.ops.lock().expect("dynamic policy lock poisoned");
        guard.as_ref().map(f)
    }
}

impl SchedulingPolicy for DynamicPolicy {
    fn sched_type(&self) -> &str {
        &self.sched_type
    }

    fn fini(&self) {
        let table = self.ops.lock().expect("dynamic policy lock poisoned").take();
        if let Some(table) = table {
            self.registry.context_destroy(table.ctx);
            if self.owns_registration {
                self.registry.unload(&self.sched_type);
            }
        }
    }

    fn schedule(&self) -> i32 {
        // SAFETY: the table is only reachable while its context is held.
        self.with_ops(|ops| unsafe { (ops.schedule)() })
            .unwrap_or(errno::DISABLED)
    }

    fn initial_priority(&self, max_priority: u32) -> u32 {
        self.with_ops(|ops| unsafe { (ops.initial_priority)(max_priority) })
            .unwrap_or_else(|| default_initial_priority(max_priority))
    }

    fn job_is_pending(&self) {
        self.with_ops(|ops| unsafe { (ops.job_is_pending)() });
    }

    fn errno(&self) -> i32 {
        self.with_ops(|ops| unsafe { (ops.get_errno)() })
            .unwrap_or(errno::DISABLED)
    }

    fn strerror(&self, code: i32) -> Option<String> {
        self.with_ops(|ops| {
            // SAFETY: a non-null return is a NUL-terminated string owned by
            // the plugin.
            let ptr = unsafe { (ops.strerror)(code) };
            if ptr.is_null() {
                None
            } else {
                Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
            }
        })
        .flatten()
    }
}

impl Drop for DynamicPolicy {
    fn drop(&mut self) {
        if self.ops.get_mut().map(|t| t.is_some()).unwrap_or(false) {
            warn!(sched_type = %self.sched_type, "dynamic policy dropped without fini");
            self.fini();
        }
    }
}
