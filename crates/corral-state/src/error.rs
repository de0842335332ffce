//! Error types for the Corral state store.

use thiserror::Error;

use crate::coordinator::StateCategory;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

/// A checkpoint that did not reach stable storage. The category stays
/// stale until it is dirtied again.
#[derive(Debug, Error)]
#[error("failed to checkpoint {category} state: {source}")]
pub struct PersistenceError {
    pub category: StateCategory,
    #[source]
    pub source: StateError,
}
