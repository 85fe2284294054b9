use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;

/// One-shot carrier of a dataset plus the name of the edge it traveled on.
///
/// Created fresh each time data flows along an edge, consumed exactly once
/// by the downstream vertex, then discarded.
#[derive(Debug, Clone)]
pub struct Envelope {
    edge_name: String,
    dataset: Dataset,
}

impl Envelope {
    pub(crate) fn new(edge_name: impl Into<String>, dataset: Dataset) -> Self {
        Self {
            edge_name: edge_name.into(),
            dataset,
        }
    }

    pub fn edge_name(&self) -> &str {
        &self.edge_name
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> Dataset {
        self.dataset
    }
}

/// A named point-to-point connector between a producer and a consumer
/// vertex.
///
/// An edge has at most one producer and at most one consumer for its
/// lifetime; fan-out is done by a vertex owning several edges, never by
/// the edge itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Edge {
    pub name: String,
    pub producer: Option<String>,
    pub consumer: Option<String>,
}

impl Edge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer: None,
            consumer: None,
        }
    }

    /// Whether both ends of the edge are attached.
    pub fn is_wired(&self) -> bool {
        self.producer.is_some() && self.consumer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_edge_starts_unwired() {
        let edge = Edge::new("raw");
        assert_eq!(edge.name, "raw");
        assert!(edge.producer.is_none());
        assert!(edge.consumer.is_none());
        assert!(!edge.is_wired());
    }

    #[test]
    fn test_edge_wired_after_both_ends() {
        let mut edge = Edge::new("raw");
        edge.producer = Some("gen".into());
        assert!(!edge.is_wired());
        edge.consumer = Some("out".into());
        assert!(edge.is_wired());
    }

    #[test]
    fn test_envelope_carries_edge_name() {
        let ds = Dataset::from_rows(vec!["n".into()], vec![vec![json!(1)]]).unwrap();
        let env = Envelope::new("raw", ds);
        assert_eq!(env.edge_name(), "raw");
        assert_eq!(env.dataset().num_rows(), 1);
        assert_eq!(env.into_dataset().num_rows(), 1);
    }
}
