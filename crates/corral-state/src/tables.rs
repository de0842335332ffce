//! redb table definitions for the Corral state store.
//!
//! One table per state category, `&str` keys and JSON `&[u8]` values.
//! Every checkpoint replaces a table's contents entirely.

use redb::TableDefinition;

pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Job records keyed by decimal job id.
pub const JOBS: RecordTable = TableDefinition::new("jobs");

/// Node records keyed by node name.
pub const NODES: RecordTable = TableDefinition::new("nodes");

/// Partition records keyed by partition name.
pub const PARTITIONS: RecordTable = TableDefinition::new("partitions");

/// Trigger records keyed by decimal trigger id.
pub const TRIGGERS: RecordTable = TableDefinition::new("triggers");
