//! Selection error types.

use thiserror::Error;

pub type SelectResult<T> = Result<T, SelectError>;

/// Already-allocated resources exceed a node's capacity.
///
/// Means the controller's bookkeeping is wrong, not that the request is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resource accounting violation: {resource} capacity {capacity} < allocated {allocated}")]
pub struct ResourceAccountingError {
    pub resource: &'static str,
    pub capacity: u32,
    pub allocated: u32,
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("unknown select type: {0}")]
    UnknownType(String),
}
