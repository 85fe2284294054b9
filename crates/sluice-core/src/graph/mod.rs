//! Graph connectivity and push-based execution.
//!
//! A pipeline is a directed graph of vertices connected by named edges.
//! Four archetypes cover every vertex: sources (0-in/1-out, the only
//! vertices a caller triggers), sinks (1-in/0-out), transforms
//! (1-in/1-out), and the routing transforms with overridden arity —
//! merge (N→1), dispatch (1→N), broadcast (1→N), and pairwise join
//! (2→1). Merge and join buffer partial arrivals in a per-vertex
//! barrier, which is how fan-in synchronizes across independent,
//! sequential `pump` calls.

pub mod edge;
pub mod executor;
pub mod vertex;

pub use edge::{Edge, Envelope};
pub use executor::Graph;
pub use vertex::{Behavior, DispatchPolicy, JoinKind, JoinPolicy, Vertex};
