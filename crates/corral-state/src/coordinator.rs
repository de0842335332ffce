//! Coalescing checkpoint coordinator.
//!
//! Mutating threads only bump a counter and signal; the single
//! persistence thread decides when to write. Counters are reset only by
//! that thread, at the moment it starts a category's checkpoint, so a
//! mark that lands during a write is picked up on the next round.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{PersistenceError, StateResult};

/// One independently checkpointed slice of controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCategory {
    Jobs,
    Nodes,
    Partitions,
    Triggers,
}

impl StateCategory {
    /// Checkpoint order within one round.
    pub const ALL: [StateCategory; 4] = [
        StateCategory::Jobs,
        StateCategory::Nodes,
        StateCategory::Partitions,
        StateCategory::Triggers,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StateCategory::Jobs => "job",
            StateCategory::Nodes => "node",
            StateCategory::Partitions => "partition",
            StateCategory::Triggers => "trigger",
        };
        f.write_str(s)
    }
}

/// Writes one category of state to stable storage.
pub trait Checkpoint: Send + Sync + 'static {
    fn checkpoint(&self, category: StateCategory) -> StateResult<()>;
}

#[derive(Default)]
struct Counters {
    dirty: [u64; 4],
    shutdown: bool,
}

impl Counters {
    fn clean(&self) -> bool {
        self.dirty.iter().all(|&n| n == 0)
    }
}

#[derive(Default)]
struct Shared {
    counters: Mutex<Counters>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().expect("save coordinator lock poisoned")
    }
}

/// Owner of the persistence thread and its dirty counters.
#[derive(Default)]
pub struct SaveCoordinator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SaveCoordinator {
    /// A coordinator with no thread yet. Dirty marks made before
    /// [`start`](Self::start) are kept and written on the first round.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the persistence thread. Calling it again while running is a
    /// no-op.
    pub fn start(&self, checkpointer: Arc<dyn Checkpoint>) -> std::io::Result<()> {
        let mut worker = self.worker.lock().expect("save coordinator lock poisoned");
        if worker.is_some() {
            return Ok(());
        }
        self.shared.lock().shutdown = false;
        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("state-save".to_string())
            .spawn(move || persistence_loop(&shared, checkpointer.as_ref()))?;
        *worker = Some(handle);
        info!("state save thread started");
        Ok(())
    }

    fn mark(&self, category: StateCategory) {
        let mut counters = self.shared.lock();
        counters.dirty[category.index()] += 1;
        self.shared.wake.notify_one();
    }

    pub fn schedule_job_save(&self) {
        self.mark(StateCategory::Jobs);
    }

    pub fn schedule_node_save(&self) {
        self.mark(StateCategory::Nodes);
    }

    pub fn schedule_part_save(&self) {
        self.mark(StateCategory::Partitions);
    }

    pub fn schedule_trigger_save(&self) {
        self.mark(StateCategory::Triggers);
    }

    /// Marks for `category` not yet taken by the persistence thread.
    pub fn pending(&self, category: StateCategory) -> u64 {
        self.shared.lock().dirty[category.index()]
    }

    /// Write everything still dirty, then stop the thread. Idempotent.
    pub fn shutdown(&self) {
        let handle = self
            .worker
            .lock()
            .expect("save coordinator lock poisoned")
            .take();
        let Some(handle) = handle else {
            return;
        };
        {
            let mut counters = self.shared.lock();
            counters.shutdown = true;
            self.shared.wake.notify_all();
        }
        if handle.join().is_err() {
            error!("state save thread panicked");
        }
        info!("state save thread stopped");
    }
}

impl Drop for SaveCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn persistence_loop(shared: &Shared, checkpointer: &dyn Checkpoint) {
    loop {
        {
            let mut counters = shared.lock();
            while counters.clean() && !counters.shutdown {
                counters = shared
                    .wake
                    .wait(counters)
                    .expect("save coordinator lock poisoned");
            }
            if counters.shutdown && counters.clean() {
                return;
            }
        }

        for category in StateCategory::ALL {
            let marks = std::mem::take(&mut shared.lock().dirty[category.index()]);
            if marks == 0 {
                continue;
            }
            match checkpointer.checkpoint(category) {
                Ok(()) => debug!(%category, coalesced = marks, "state checkpointed"),
                Err(source) => {
                    let err = PersistenceError { category, source };
                    error!(%category, error = %err, "state checkpoint failed");
                }
            }
        }
    }
}
