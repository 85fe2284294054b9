pub mod dataset;
pub mod error;
pub mod graph;

pub use dataset::Dataset;
pub use error::{BoxError, FlowError, Result};
pub use graph::{DispatchPolicy, Graph, JoinKind, JoinPolicy};
