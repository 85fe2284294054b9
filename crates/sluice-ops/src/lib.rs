//! Built-in collaborators for the sluice engine.
//!
//! Everything here plugs into a vertex contract from `sluice-core`:
//! sources are `() -> Dataset` closures, transforms `(Dataset) -> Dataset`,
//! sinks `(Dataset) -> ()`. The engine wraps any failure raised inside
//! them into `FlowError::Collaborator` with the vertex name attached.

pub mod sink;
pub mod source;
pub mod transform;

use thiserror::Error;

/// Failure raised inside a built-in operator while the graph is running.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct OpError(pub String);

impl OpError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub use transform::{AggKind, FilterOp, Keep, SortOrder};
