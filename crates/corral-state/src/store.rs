//! StateStore — redb-backed checkpoint storage for the controller.
//!
//! Each category is written wholesale: a save drops the table and
//! refills it inside one write transaction, so a reader sees either the
//! previous checkpoint or the new one, never a mix. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// File name of the checkpoint database inside the state directory.
pub const STATE_FILE: &str = "corral_state.redb";

/// Thread-safe checkpoint store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given file path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Open the store inside `dir`, creating the directory if needed.
    pub fn open_dir(dir: &Path) -> StateResult<Self> {
        std::fs::create_dir_all(dir).map_err(map_err!(Open))?;
        Self::open(&dir.join(STATE_FILE))
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [JOBS, NODES, PARTITIONS, TRIGGERS] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic wholesale access ───────────────────────────────────

    fn replace_all<T: Serialize>(
        &self,
        definition: RecordTable,
        records: &[T],
        key: impl Fn(&T) -> String,
    ) -> StateResult<()> {
        let encoded = records
            .iter()
            .map(|r| Ok((key(r), serde_json::to_vec(r).map_err(map_err!(Serialize))?)))
            .collect::<StateResult<Vec<_>>>()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.delete_table(definition).map_err(map_err!(Table))?;
        {
            let mut table = txn.open_table(definition).map_err(map_err!(Table))?;
            for (key, value) in &encoded {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(table = definition.name(), count = encoded.len(), "checkpoint written");
        Ok(())
    }

    fn load_all<T: DeserializeOwned>(&self, definition: RecordTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(definition).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    pub fn save_jobs(&self, jobs: &[JobRecord]) -> StateResult<()> {
        self.replace_all(JOBS, jobs, JobRecord::table_key)
    }

    /// All saved jobs, ordered by job id.
    pub fn load_jobs(&self) -> StateResult<Vec<JobRecord>> {
        let mut jobs: Vec<JobRecord> = self.load_all(JOBS)?;
        jobs.sort_by_key(|j| j.job_id);
        Ok(jobs)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    pub fn save_nodes(&self, nodes: &[NodeRecord]) -> StateResult<()> {
        self.replace_all(NODES, nodes, NodeRecord::table_key)
    }

    pub fn load_nodes(&self) -> StateResult<Vec<NodeRecord>> {
        self.load_all(NODES)
    }

    // ── Partitions ─────────────────────────────────────────────────

    pub fn save_partitions(&self, partitions: &[PartitionRecord]) -> StateResult<()> {
        self.replace_all(PARTITIONS, partitions, PartitionRecord::table_key)
    }

    pub fn load_partitions(&self) -> StateResult<Vec<PartitionRecord>> {
        self.load_all(PARTITIONS)
    }

    // ── Triggers ───────────────────────────────────────────────────

    pub fn save_triggers(&self, triggers: &[TriggerRecord]) -> StateResult<()> {
        self.replace_all(TRIGGERS, triggers, TriggerRecord::table_key)
    }

    /// All saved triggers, ordered by trigger id.
    pub fn load_triggers(&self) -> StateResult<Vec<TriggerRecord>> {
        let mut triggers: Vec<TriggerRecord> = self.load_all(TRIGGERS)?;
        triggers.sort_by_key(|t| t.trigger_id);
        Ok(triggers)
    }
}
