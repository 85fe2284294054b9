use std::collections::HashMap;

use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::error::{BoxError, FlowError, Result};
use crate::graph::edge::{Edge, Envelope};
use crate::graph::vertex::{Behavior, DispatchPolicy, JoinPolicy, Vertex};

/// A pipeline graph: vertices addressed by name, connected by named
/// point-to-point edges, executed by pushing datasets from a source.
///
/// Assembly is fail-fast: every `attach_*` call enforces the target
/// vertex's arity contract and the edge's single-producer/single-consumer
/// rule immediately. `pump` validates the whole graph before any data
/// moves, so a half-wired edge never surfaces mid-run.
#[derive(Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    vertex_index: HashMap<String, usize>,
    edges: Vec<Edge>,
    edge_index: HashMap<String, usize>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("vertices", &self.vertex_index.keys().collect::<Vec<_>>())
            .field("edges", &self.edge_index.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source vertex wrapping a `() -> Dataset` collaborator.
    pub fn add_source<F>(&mut self, name: impl Into<String>, produce: F) -> Result<()>
    where
        F: FnMut() -> std::result::Result<Dataset, BoxError> + 'static,
    {
        self.add_vertex(
            name,
            Behavior::Source {
                produce: Box::new(produce),
            },
        )
    }

    /// Add a sink vertex wrapping a `(Dataset) -> ()` collaborator.
    pub fn add_sink<F>(&mut self, name: impl Into<String>, consume: F) -> Result<()>
    where
        F: FnMut(Dataset) -> std::result::Result<(), BoxError> + 'static,
    {
        self.add_vertex(
            name,
            Behavior::Sink {
                consume: Box::new(consume),
            },
        )
    }

    /// Add a 1-in/1-out transform vertex wrapping a `(Dataset) -> Dataset`
    /// collaborator.
    pub fn add_transform<F>(&mut self, name: impl Into<String>, apply: F) -> Result<()>
    where
        F: FnMut(Dataset) -> std::result::Result<Dataset, BoxError> + 'static,
    {
        self.add_vertex(
            name,
            Behavior::Transform {
                apply: Box::new(apply),
            },
        )
    }

    /// Add an N→1 merge vertex.
    pub fn add_merge(&mut self, name: impl Into<String>) -> Result<()> {
        self.add_vertex(
            name,
            Behavior::Merge {
                pending: HashMap::new(),
            },
        )
    }

    /// Add a 1→N dispatch vertex routing rows by column value.
    pub fn add_dispatch(&mut self, name: impl Into<String>, policy: DispatchPolicy) -> Result<()> {
        let name = name.into();
        policy
            .check()
            .map_err(|msg| FlowError::Config(format!("dispatch '{name}': {msg}")))?;
        self.add_vertex(name, Behavior::Dispatch { policy })
    }

    /// Add a 1→N broadcast vertex.
    pub fn add_broadcast(&mut self, name: impl Into<String>) -> Result<()> {
        self.add_vertex(name, Behavior::Broadcast)
    }

    /// Add a 2→1 pairwise-join vertex.
    pub fn add_join(&mut self, name: impl Into<String>, policy: JoinPolicy) -> Result<()> {
        let name = name.into();
        policy
            .check()
            .map_err(|msg| FlowError::Config(format!("join '{name}': {msg}")))?;
        self.add_vertex(
            name,
            Behavior::Join {
                policy,
                left: None,
                right: None,
            },
        )
    }

    fn add_vertex(&mut self, name: impl Into<String>, behavior: Behavior) -> Result<()> {
        let name = name.into();
        if self.vertex_index.contains_key(&name) {
            return Err(FlowError::connectivity(
                &name,
                "a vertex with this name already exists",
            ));
        }
        debug!(vertex = %name, kind = behavior.kind_name(), "vertex added");
        self.vertex_index.insert(name.clone(), self.vertices.len());
        self.vertices.push(Vertex::new(name, behavior));
        Ok(())
    }

    /// Register `edge` as an output of `vertex`, creating the edge record
    /// on first mention. Fails if the edge already has a producer or the
    /// vertex's output arity is exhausted.
    pub fn attach_output(&mut self, vertex: &str, edge: &str) -> Result<()> {
        let vertex_idx = self.vertex_idx(vertex)?;
        if let Some(&edge_idx) = self.edge_index.get(edge) {
            if let Some(existing) = &self.edges[edge_idx].producer {
                return Err(FlowError::connectivity(
                    vertex,
                    format!("edge '{edge}' already has producer '{existing}'"),
                ));
            }
        }
        self.vertices[vertex_idx].add_output_edge(edge)?;
        let edge_idx = self.edge_idx_or_create(edge);
        self.edges[edge_idx].producer = Some(vertex.to_string());
        Ok(())
    }

    /// Register `edge` as an input of `vertex`. Fails if the edge already
    /// has a consumer or the vertex's input arity is exhausted.
    pub fn attach_input(&mut self, edge: &str, vertex: &str) -> Result<()> {
        let vertex_idx = self.vertex_idx(vertex)?;
        if let Some(&edge_idx) = self.edge_index.get(edge) {
            if let Some(existing) = &self.edges[edge_idx].consumer {
                return Err(FlowError::connectivity(
                    vertex,
                    format!("edge '{edge}' already has consumer '{existing}'"),
                ));
            }
        }
        self.vertices[vertex_idx].add_input_edge(edge)?;
        let edge_idx = self.edge_idx_or_create(edge);
        self.edges[edge_idx].consumer = Some(vertex.to_string());
        Ok(())
    }

    /// Wire `producer --edge--> consumer` in one call.
    pub fn connect(&mut self, producer: &str, edge: &str, consumer: &str) -> Result<()> {
        self.attach_output(producer, edge)?;
        self.attach_input(edge, consumer)
    }

    /// Check the whole graph for dangling edges and under-connected
    /// vertices. Called by `pump` before any data moves.
    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            match (&edge.producer, &edge.consumer) {
                (Some(_), Some(_)) => {}
                (Some(producer), None) => {
                    return Err(FlowError::connectivity(
                        producer,
                        format!("edge '{}' has no consumer", edge.name),
                    ));
                }
                (None, Some(consumer)) => {
                    return Err(FlowError::connectivity(
                        consumer,
                        format!("edge '{}' has no producer", edge.name),
                    ));
                }
                (None, None) => {
                    return Err(FlowError::UnknownEdge(edge.name.clone()));
                }
            }
        }
        for vertex in &self.vertices {
            vertex.validate_connected()?;
        }
        Ok(())
    }

    /// Trigger one source: validate the graph, run the source's
    /// collaborator, and push the produced dataset through the graph until
    /// every branch reaches a sink.
    ///
    /// Deliveries are driven by an explicit work-list rather than native
    /// recursion; emissions are pushed in reverse registration order so
    /// the first-registered edge's whole subtree is delivered before its
    /// sibling, which keeps the depth-first ordering deterministic.
    ///
    /// Pumping the same source again re-triggers the full downstream
    /// chain; nothing is cached. Barrier state in merge and join vertices
    /// persists across pumps, which is how fan-in across several
    /// independently pumped sources synchronizes.
    pub fn pump(&mut self, source: &str) -> Result<()> {
        self.validate()?;
        let idx = self.vertex_idx(source)?;
        if !self.vertices[idx].is_source() {
            return Err(FlowError::connectivity(
                source,
                format!("cannot pump a {} vertex", self.vertices[idx].kind_name()),
            ));
        }
        info!(source = %source, "pumping");
        let emissions = self.vertices[idx].pump_source()?;

        let mut stack: Vec<Envelope> = Vec::new();
        push_emissions(&mut stack, emissions);
        while let Some(envelope) = stack.pop() {
            let edge_idx = self
                .edge_index
                .get(envelope.edge_name())
                .copied()
                .ok_or_else(|| FlowError::UnknownEdge(envelope.edge_name().to_string()))?;
            let consumer = self.edges[edge_idx]
                .consumer
                .clone()
                .ok_or_else(|| FlowError::UnknownEdge(envelope.edge_name().to_string()))?;
            let consumer_idx = self.vertex_idx(&consumer)?;
            debug!(
                edge = %envelope.edge_name(),
                vertex = %consumer,
                rows = envelope.dataset().num_rows(),
                "delivering"
            );
            let emissions = self.vertices[consumer_idx].deliver(envelope)?;
            push_emissions(&mut stack, emissions);
        }
        Ok(())
    }

    pub fn vertex_names(&self) -> impl Iterator<Item = &str> {
        self.vertices.iter().map(|v| v.name())
    }

    pub fn edge_names(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().map(|e| e.name.as_str())
    }

    fn vertex_idx(&self, name: &str) -> Result<usize> {
        self.vertex_index
            .get(name)
            .copied()
            .ok_or_else(|| FlowError::UnknownVertex(name.to_string()))
    }

    fn edge_idx_or_create(&mut self, name: &str) -> usize {
        if let Some(idx) = self.edge_index.get(name) {
            return *idx;
        }
        let idx = self.edges.len();
        self.edge_index.insert(name.to_string(), idx);
        self.edges.push(Edge::new(name));
        idx
    }
}

/// Push emissions so the first-registered edge is popped first.
fn push_emissions(stack: &mut Vec<Envelope>, emissions: Vec<(String, Dataset)>) {
    for (edge, dataset) in emissions.into_iter().rev() {
        stack.push(Envelope::new(edge, dataset));
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::{json, Value};

    use super::*;
    use crate::graph::vertex::JoinKind;

    fn ds(columns: &[&str], rows: Vec<Vec<Value>>) -> Dataset {
        Dataset::from_rows(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn fixed_source(dataset: Dataset) -> impl FnMut() -> std::result::Result<Dataset, BoxError> {
        move || Ok(dataset.clone())
    }

    type Captured = Rc<RefCell<Vec<Dataset>>>;

    fn capture_sink(buf: Captured) -> impl FnMut(Dataset) -> std::result::Result<(), BoxError> {
        move |dataset| {
            buf.borrow_mut().push(dataset);
            Ok(())
        }
    }

    #[test]
    fn test_round_trip_identity() {
        let data = ds(&["n"], vec![vec![json!(1)], vec![json!(2)]]);
        let captured: Captured = Rc::new(RefCell::new(Vec::new()));

        let mut graph = Graph::new();
        graph.add_source("gen", fixed_source(data.clone())).unwrap();
        graph
            .add_transform("identity", |dataset| Ok(dataset))
            .unwrap();
        graph.add_sink("out", capture_sink(captured.clone())).unwrap();
        graph.connect("gen", "raw", "identity").unwrap();
        graph.connect("identity", "done", "out").unwrap();

        graph.pump("gen").unwrap();
        assert_eq!(captured.borrow().as_slice(), &[data]);
    }

    #[test]
    fn test_repeated_pump_retriggers_chain() {
        let captured: Captured = Rc::new(RefCell::new(Vec::new()));
        let mut graph = Graph::new();
        graph
            .add_source("gen", fixed_source(ds(&["n"], vec![vec![json!(1)]])))
            .unwrap();
        graph.add_sink("out", capture_sink(captured.clone())).unwrap();
        graph.connect("gen", "raw", "out").unwrap();

        graph.pump("gen").unwrap();
        graph.pump("gen").unwrap();
        assert_eq!(captured.borrow().len(), 2);
    }

    #[test]
    fn test_merge_across_independent_pumps() {
        let captured: Captured = Rc::new(RefCell::new(Vec::new()));
        let mut graph = Graph::new();
        graph
            .add_source("s1", fixed_source(ds(&["n"], vec![vec![json!(1)]])))
            .unwrap();
        graph
            .add_source("s2", fixed_source(ds(&["n"], vec![vec![json!(2)]])))
            .unwrap();
        graph
            .add_source("s3", fixed_source(ds(&["n"], vec![vec![json!(3)]])))
            .unwrap();
        graph.add_merge("union").unwrap();
        graph.add_sink("out", capture_sink(captured.clone())).unwrap();
        graph.connect("s1", "a", "union").unwrap();
        graph.connect("s2", "b", "union").unwrap();
        graph.connect("s3", "c", "union").unwrap();
        graph.connect("union", "merged", "out").unwrap();

        graph.pump("s1").unwrap();
        graph.pump("s2").unwrap();
        assert!(captured.borrow().is_empty());

        graph.pump("s3").unwrap();
        assert_eq!(captured.borrow().len(), 1);
        assert_eq!(
            captured.borrow()[0].rows(),
            &[vec![json!(1)], vec![json!(2)], vec![json!(3)]]
        );

        // The barrier resets: a second round of pumps merges again.
        graph.pump("s1").unwrap();
        graph.pump("s2").unwrap();
        graph.pump("s3").unwrap();
        assert_eq!(captured.borrow().len(), 2);
    }

    #[test]
    fn test_dispatch_fans_out_through_graph() {
        let left: Captured = Rc::new(RefCell::new(Vec::new()));
        let right: Captured = Rc::new(RefCell::new(Vec::new()));
        let data = ds(
            &["k"],
            vec![vec![json!("x")], vec![json!("y")], vec![json!("x")]],
        );

        let mut graph = Graph::new();
        graph.add_source("gen", fixed_source(data)).unwrap();
        graph
            .add_dispatch(
                "split",
                DispatchPolicy::on_column("k").route("x", "e1").route("y", "e2"),
            )
            .unwrap();
        graph.add_sink("s1", capture_sink(left.clone())).unwrap();
        graph.add_sink("s2", capture_sink(right.clone())).unwrap();
        graph.connect("gen", "raw", "split").unwrap();
        graph.connect("split", "e1", "s1").unwrap();
        graph.connect("split", "e2", "s2").unwrap();

        graph.pump("gen").unwrap();
        assert_eq!(left.borrow()[0].num_rows(), 2);
        assert_eq!(right.borrow()[0].num_rows(), 1);
    }

    #[test]
    fn test_broadcast_delivers_to_all_branches() {
        let a: Captured = Rc::new(RefCell::new(Vec::new()));
        let b: Captured = Rc::new(RefCell::new(Vec::new()));
        let data = ds(&["n"], vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]]);

        let mut graph = Graph::new();
        graph.add_source("gen", fixed_source(data)).unwrap();
        graph.add_broadcast("copy").unwrap();
        graph.add_sink("s1", capture_sink(a.clone())).unwrap();
        graph.add_sink("s2", capture_sink(b.clone())).unwrap();
        graph.connect("gen", "raw", "copy").unwrap();
        graph.connect("copy", "c1", "s1").unwrap();
        graph.connect("copy", "c2", "s2").unwrap();

        graph.pump("gen").unwrap();
        assert_eq!(a.borrow()[0].num_rows(), 3);
        assert_eq!(b.borrow()[0].num_rows(), 3);
    }

    #[test]
    fn test_join_fed_by_two_sources() {
        let captured: Captured = Rc::new(RefCell::new(Vec::new()));
        let left = ds(
            &["id", "v"],
            vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]],
        );
        let right = ds(&["id", "w"], vec![vec![json!(1), json!(10)]]);

        let mut graph = Graph::new();
        graph.add_source("ls", fixed_source(left)).unwrap();
        graph.add_source("rs", fixed_source(right)).unwrap();
        graph
            .add_join("j", JoinPolicy::new("id", "l", "r", JoinKind::Inner))
            .unwrap();
        graph.add_sink("out", capture_sink(captured.clone())).unwrap();
        graph.connect("ls", "l", "j").unwrap();
        graph.connect("rs", "r", "j").unwrap();
        graph.connect("j", "joined", "out").unwrap();

        graph.pump("ls").unwrap();
        assert!(captured.borrow().is_empty());
        graph.pump("rs").unwrap();
        assert_eq!(
            captured.borrow()[0].rows(),
            &[vec![json!(1), json!("a"), json!(10)]]
        );
    }

    #[test]
    fn test_second_producer_on_edge_rejected() {
        let mut graph = Graph::new();
        graph
            .add_source("s1", fixed_source(Dataset::new(vec![])))
            .unwrap();
        graph
            .add_source("s2", fixed_source(Dataset::new(vec![])))
            .unwrap();
        graph.add_sink("out", |_| Ok(())).unwrap();
        graph.connect("s1", "raw", "out").unwrap();
        let err = graph.attach_output("s2", "raw").unwrap_err();
        assert!(matches!(err, FlowError::Connectivity { .. }));
    }

    #[test]
    fn test_dangling_edge_fails_at_pump() {
        let mut graph = Graph::new();
        graph
            .add_source("gen", fixed_source(Dataset::new(vec![])))
            .unwrap();
        graph.attach_output("gen", "raw").unwrap();

        let err = graph.pump("gen").unwrap_err();
        match err {
            FlowError::Connectivity { vertex, message } => {
                assert_eq!(vertex, "gen");
                assert!(message.contains("raw"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_pump_unknown_vertex() {
        let mut graph = Graph::new();
        let err = graph.pump("nope").unwrap_err();
        assert!(matches!(err, FlowError::UnknownVertex(_)));
    }

    #[test]
    fn test_pump_non_source() {
        let captured: Captured = Rc::new(RefCell::new(Vec::new()));
        let mut graph = Graph::new();
        graph
            .add_source("gen", fixed_source(ds(&["n"], vec![vec![json!(1)]])))
            .unwrap();
        graph.add_sink("out", capture_sink(captured.clone())).unwrap();
        graph.connect("gen", "raw", "out").unwrap();
        let err = graph.pump("out").unwrap_err();
        assert!(matches!(err, FlowError::Connectivity { .. }));
    }

    #[test]
    fn test_collaborator_error_carries_vertex_name() {
        let mut graph = Graph::new();
        graph
            .add_source("gen", || Err("disk on fire".into()))
            .unwrap();
        graph.add_sink("out", |_| Ok(())).unwrap();
        graph.connect("gen", "raw", "out").unwrap();

        let err = graph.pump("gen").unwrap_err();
        match err {
            FlowError::Collaborator { vertex, source } => {
                assert_eq!(vertex, "gen");
                assert!(source.to_string().contains("disk on fire"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_vertex_name_rejected() {
        let mut graph = Graph::new();
        graph.add_merge("m").unwrap();
        let err = graph.add_merge("m").unwrap_err();
        assert!(matches!(err, FlowError::Connectivity { .. }));
    }

    #[test]
    fn test_depth_first_delivery_order() {
        // A broadcast with two branches: the first-registered branch's sink
        // must observe its dataset before the second branch's sink.
        let order: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();

        let mut graph = Graph::new();
        graph
            .add_source("gen", fixed_source(ds(&["n"], vec![vec![json!(1)]])))
            .unwrap();
        graph.add_broadcast("copy").unwrap();
        graph
            .add_sink("first", move |_| {
                o1.borrow_mut().push("first");
                Ok(())
            })
            .unwrap();
        graph
            .add_sink("second", move |_| {
                o2.borrow_mut().push("second");
                Ok(())
            })
            .unwrap();
        graph.connect("gen", "raw", "copy").unwrap();
        graph.connect("copy", "b1", "first").unwrap();
        graph.connect("copy", "b2", "second").unwrap();

        graph.pump("gen").unwrap();
        assert_eq!(order.borrow().as_slice(), &["first", "second"]);
    }
}
