use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::error::{BoxError, FlowError, Result};
use crate::graph::edge::Envelope;

/// Collaborator closure for a source vertex: produces a dataset per pump.
pub type SourceFn = Box<dyn FnMut() -> std::result::Result<Dataset, BoxError>>;

/// Collaborator closure for a transform vertex.
pub type TransformFn = Box<dyn FnMut(Dataset) -> std::result::Result<Dataset, BoxError>>;

/// Collaborator closure for a sink vertex: terminal side effect.
pub type SinkFn = Box<dyn FnMut(Dataset) -> std::result::Result<(), BoxError>>;

/// How many edges one side of a vertex accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    One,
    Two,
    Many,
}

impl Arity {
    /// Whether another edge may be registered given how many already are.
    fn admits(self, registered: usize) -> bool {
        match self {
            Arity::None => false,
            Arity::One => registered < 1,
            Arity::Two => registered < 2,
            Arity::Many => true,
        }
    }

    /// Minimum number of connected edges required at trigger time.
    fn required(self) -> usize {
        match self {
            Arity::None => 0,
            Arity::One => 1,
            Arity::Two => 2,
            Arity::Many => 1,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Arity::None => "no",
            Arity::One => "exactly 1",
            Arity::Two => "exactly 2",
            Arity::Many => "1 or more",
        }
    }
}

/// Route table for a dispatch vertex: which output edge each value of the
/// routing column is sent to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPolicy {
    /// Column whose values select the route.
    pub column: String,
    /// Value → output-edge pairs. A value may appear at most once; an edge
    /// may be the target of several values.
    pub routes: Vec<(Value, String)>,
    /// Edge that receives rows whose value has no mapping.
    pub default_route: Option<String>,
    /// Fail instead of dropping unmatched rows.
    pub strict: bool,
}

impl DispatchPolicy {
    pub fn on_column(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            routes: Vec::new(),
            default_route: None,
            strict: false,
        }
    }

    /// Map a value to an output edge.
    pub fn route(mut self, value: impl Into<Value>, edge: impl Into<String>) -> Self {
        self.routes.push((value.into(), edge.into()));
        self
    }

    /// Send unmatched rows to this edge instead of dropping them.
    pub fn otherwise(mut self, edge: impl Into<String>) -> Self {
        self.default_route = Some(edge.into());
        self
    }

    /// Treat an unmatched value as a fatal routing error.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Check the route table itself: keys must be strings or integers and
    /// may not repeat.
    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        for (i, (value, _)) in self.routes.iter().enumerate() {
            let scalar = value.is_string() || value.is_i64() || value.is_u64();
            if !scalar {
                return Err(format!("route key {value} must be a string or integer"));
            }
            if self.routes[..i].iter().any(|(v, _)| v == value) {
                return Err(format!("route key {value} appears more than once"));
            }
        }
        if self.routes.is_empty() && self.default_route.is_none() {
            return Err("dispatch needs at least one route or a default".to_string());
        }
        Ok(())
    }

    fn target_for(&self, cell: &Value) -> Option<&str> {
        self.routes
            .iter()
            .find(|(value, _)| value == cell)
            .map(|(_, edge)| edge.as_str())
    }
}

/// Relational combine semantics for a pairwise-join vertex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

/// Configuration for a pairwise-join vertex: which input edge plays the
/// left role, which the right, and how to combine them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPolicy {
    /// Key column, present on both sides.
    pub on: String,
    pub left_edge: String,
    pub right_edge: String,
    pub kind: JoinKind,
}

impl JoinPolicy {
    pub fn new(
        on: impl Into<String>,
        left_edge: impl Into<String>,
        right_edge: impl Into<String>,
        kind: JoinKind,
    ) -> Self {
        Self {
            on: on.into(),
            left_edge: left_edge.into(),
            right_edge: right_edge.into(),
            kind,
        }
    }

    pub(crate) fn check(&self) -> std::result::Result<(), String> {
        if self.left_edge == self.right_edge {
            return Err("left and right edges must differ".to_string());
        }
        Ok(())
    }
}

/// What a vertex does when data arrives, together with any barrier state
/// it keeps between deliveries.
pub enum Behavior {
    Source { produce: SourceFn },
    Sink { consume: SinkFn },
    Transform { apply: TransformFn },
    /// N→1 row-wise union; forwards once every input edge has delivered.
    Merge { pending: HashMap<String, Dataset> },
    /// 1→N partition by column value.
    Dispatch { policy: DispatchPolicy },
    /// 1→N copy to every output edge.
    Broadcast,
    /// 2→1 relational combine; forwards once both roles have delivered.
    Join {
        policy: JoinPolicy,
        left: Option<Dataset>,
        right: Option<Dataset>,
    },
}

impl Behavior {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Behavior::Source { .. } => "source",
            Behavior::Sink { .. } => "sink",
            Behavior::Transform { .. } => "transform",
            Behavior::Merge { .. } => "merge",
            Behavior::Dispatch { .. } => "dispatch",
            Behavior::Broadcast => "broadcast",
            Behavior::Join { .. } => "join",
        }
    }

    fn input_arity(&self) -> Arity {
        match self {
            Behavior::Source { .. } => Arity::None,
            Behavior::Sink { .. } => Arity::One,
            Behavior::Transform { .. } => Arity::One,
            Behavior::Merge { .. } => Arity::Many,
            Behavior::Dispatch { .. } => Arity::One,
            Behavior::Broadcast => Arity::One,
            Behavior::Join { .. } => Arity::Two,
        }
    }

    fn output_arity(&self) -> Arity {
        match self {
            Behavior::Source { .. } => Arity::One,
            Behavior::Sink { .. } => Arity::None,
            Behavior::Transform { .. } => Arity::One,
            Behavior::Merge { .. } => Arity::One,
            Behavior::Dispatch { .. } => Arity::Many,
            Behavior::Broadcast => Arity::Many,
            Behavior::Join { .. } => Arity::One,
        }
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

/// A node in the pipeline graph: a name, a behavior, and the input/output
/// edges registered against the behavior's arity contract.
pub struct Vertex {
    name: String,
    behavior: Behavior,
    /// Input edge names in registration order.
    inputs: Vec<String>,
    /// Output edge names in registration order.
    outputs: Vec<String>,
}

impl fmt::Debug for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vertex")
            .field("name", &self.name)
            .field("kind", &self.behavior.kind_name())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl Vertex {
    pub(crate) fn new(name: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            name: name.into(),
            behavior,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_name(&self) -> &'static str {
        self.behavior.kind_name()
    }

    pub fn input_edges(&self) -> &[String] {
        &self.inputs
    }

    pub fn output_edges(&self) -> &[String] {
        &self.outputs
    }

    pub(crate) fn is_source(&self) -> bool {
        matches!(self.behavior, Behavior::Source { .. })
    }

    /// Register an input edge, failing immediately on an arity violation.
    pub(crate) fn add_input_edge(&mut self, edge: &str) -> Result<()> {
        if self.inputs.iter().any(|e| e == edge) {
            return Err(FlowError::connectivity(
                &self.name,
                format!("edge '{edge}' is already registered as an input"),
            ));
        }
        let arity = self.behavior.input_arity();
        if !arity.admits(self.inputs.len()) {
            return Err(FlowError::connectivity(
                &self.name,
                format!(
                    "{} accepts {} input edge(s); cannot register '{edge}'",
                    self.behavior.kind_name(),
                    arity.describe()
                ),
            ));
        }
        self.inputs.push(edge.to_string());
        Ok(())
    }

    /// Register an output edge, failing immediately on an arity violation.
    pub(crate) fn add_output_edge(&mut self, edge: &str) -> Result<()> {
        if self.outputs.iter().any(|e| e == edge) {
            return Err(FlowError::connectivity(
                &self.name,
                format!("edge '{edge}' is already registered as an output"),
            ));
        }
        let arity = self.behavior.output_arity();
        if !arity.admits(self.outputs.len()) {
            return Err(FlowError::connectivity(
                &self.name,
                format!(
                    "{} accepts {} output edge(s); cannot register '{edge}'",
                    self.behavior.kind_name(),
                    arity.describe()
                ),
            ));
        }
        self.outputs.push(edge.to_string());
        Ok(())
    }

    /// Trigger-time check that every required edge is connected.
    pub(crate) fn validate_connected(&self) -> Result<()> {
        let need_in = self.behavior.input_arity().required();
        if self.inputs.len() < need_in {
            return Err(FlowError::connectivity(
                &self.name,
                format!(
                    "{} requires {} input edge(s), {} connected",
                    self.behavior.kind_name(),
                    self.behavior.input_arity().describe(),
                    self.inputs.len()
                ),
            ));
        }
        let need_out = self.behavior.output_arity().required();
        if self.outputs.len() < need_out {
            return Err(FlowError::connectivity(
                &self.name,
                format!(
                    "{} requires {} output edge(s), {} connected",
                    self.behavior.kind_name(),
                    self.behavior.output_arity().describe(),
                    self.outputs.len()
                ),
            ));
        }
        match &self.behavior {
            Behavior::Join { policy, .. } => {
                for role_edge in [&policy.left_edge, &policy.right_edge] {
                    if !self.inputs.iter().any(|e| e == role_edge) {
                        return Err(FlowError::connectivity(
                            &self.name,
                            format!("join role edge '{role_edge}' is not connected"),
                        ));
                    }
                }
            }
            Behavior::Dispatch { policy } => {
                let targets = policy
                    .routes
                    .iter()
                    .map(|(_, edge)| edge)
                    .chain(policy.default_route.as_ref());
                for target in targets {
                    if !self.outputs.iter().any(|e| e == target) {
                        return Err(FlowError::connectivity(
                            &self.name,
                            format!("route target edge '{target}' is not connected"),
                        ));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Produce a dataset from a source's collaborator and hand it to the
    /// source's single output edge.
    pub(crate) fn pump_source(&mut self) -> Result<Vec<(String, Dataset)>> {
        match &mut self.behavior {
            Behavior::Source { produce } => {
                let dataset = produce().map_err(|e| FlowError::collaborator(&self.name, e))?;
                debug!(vertex = %self.name, rows = dataset.num_rows(), "source produced dataset");
                single_emission(&self.name, &self.outputs, dataset)
            }
            other => Err(FlowError::connectivity(
                &self.name,
                format!("cannot pump a {} vertex", other.kind_name()),
            )),
        }
    }

    /// Accept a delivery and return the resulting emissions, in output-edge
    /// registration order. Routing vertices may buffer and emit nothing.
    pub(crate) fn deliver(&mut self, envelope: Envelope) -> Result<Vec<(String, Dataset)>> {
        let Vertex {
            name,
            behavior,
            inputs,
            outputs,
        } = self;

        match behavior {
            Behavior::Source { .. } => Err(FlowError::connectivity(
                name.as_str(),
                "a source cannot receive deliveries",
            )),
            Behavior::Sink { consume } => {
                let dataset = envelope.into_dataset();
                consume(dataset).map_err(|e| FlowError::collaborator(name.as_str(), e))?;
                Ok(Vec::new())
            }
            Behavior::Transform { apply } => {
                let dataset = envelope.into_dataset();
                let result =
                    apply(dataset).map_err(|e| FlowError::collaborator(name.as_str(), e))?;
                single_emission(name, outputs, result)
            }
            Behavior::Merge { pending } => {
                merge_deliver(name, inputs, outputs, pending, envelope)
            }
            Behavior::Dispatch { policy } => dispatch_deliver(name, outputs, policy, envelope),
            Behavior::Broadcast => {
                let dataset = envelope.into_dataset();
                Ok(outputs
                    .iter()
                    .map(|edge| (edge.clone(), dataset.clone()))
                    .collect())
            }
            Behavior::Join {
                policy,
                left,
                right,
            } => join_deliver(name, outputs, policy, left, right, envelope),
        }
    }
}

/// Emit one dataset on a vertex's single output edge.
fn single_emission(
    name: &str,
    outputs: &[String],
    dataset: Dataset,
) -> Result<Vec<(String, Dataset)>> {
    let edge = outputs.first().ok_or_else(|| {
        FlowError::connectivity(name, "no output edge connected")
    })?;
    Ok(vec![(edge.clone(), dataset)])
}

fn merge_deliver(
    name: &str,
    inputs: &[String],
    outputs: &[String],
    pending: &mut HashMap<String, Dataset>,
    envelope: Envelope,
) -> Result<Vec<(String, Dataset)>> {
    let edge = envelope.edge_name().to_string();
    if pending.contains_key(&edge) {
        return Err(FlowError::DuplicateDelivery {
            vertex: name.to_string(),
            edge,
        });
    }
    pending.insert(edge, envelope.into_dataset());
    debug!(
        vertex = %name,
        received = pending.len(),
        expected = inputs.len(),
        "merge barrier progress"
    );
    if pending.len() < inputs.len() {
        return Ok(Vec::new());
    }

    // Barrier complete. Check schemas before draining so a failure leaves
    // the buffered inputs in place.
    let Some(first) = pending.get(&inputs[0]) else {
        return Err(FlowError::routing(
            name,
            format!("barrier entry for edge '{}' disappeared", inputs[0]),
        ));
    };
    for edge in &inputs[1..] {
        let Some(dataset) = pending.get(edge) else {
            return Err(FlowError::routing(
                name,
                format!("barrier entry for edge '{edge}' disappeared"),
            ));
        };
        if !first.same_columns(dataset) {
            return Err(FlowError::schema_mismatch(
                name,
                format!(
                    "input '{edge}' has columns {:?}, expected {:?}",
                    dataset.columns(),
                    first.columns()
                ),
            ));
        }
    }

    let mut combined = Dataset::new(first.columns().to_vec());
    for edge in inputs {
        let Some(dataset) = pending.remove(edge) else {
            return Err(FlowError::routing(
                name,
                format!("barrier entry for edge '{edge}' disappeared"),
            ));
        };
        for row in dataset.rows() {
            combined.push_row(row.clone())?;
        }
    }
    debug!(vertex = %name, rows = combined.num_rows(), "merge barrier complete");
    single_emission(name, outputs, combined)
}

fn dispatch_deliver(
    name: &str,
    outputs: &[String],
    policy: &DispatchPolicy,
    envelope: Envelope,
) -> Result<Vec<(String, Dataset)>> {
    let dataset = envelope.into_dataset();
    let Some(col_idx) = dataset.column_index(&policy.column) else {
        return Err(FlowError::schema_mismatch(
            name,
            format!(
                "routing column '{}' not found in {:?}",
                policy.column,
                dataset.columns()
            ),
        ));
    };

    // Assign every row before forwarding anything so that strict mode
    // never produces a partial fan-out.
    let mut buckets: Vec<Vec<Vec<Value>>> = vec![Vec::new(); outputs.len()];
    let mut dropped = 0usize;
    for row in dataset.rows() {
        let cell = &row[col_idx];
        let target = policy
            .target_for(cell)
            .or(policy.default_route.as_deref());
        match target {
            Some(edge) => {
                let Some(pos) = outputs.iter().position(|o| o == edge) else {
                    return Err(FlowError::routing(
                        name,
                        format!("route target edge '{edge}' is not a registered output"),
                    ));
                };
                buckets[pos].push(row.clone());
            }
            None if policy.strict => {
                return Err(FlowError::routing(
                    name,
                    format!("no route for value {cell} in column '{}'", policy.column),
                ));
            }
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(vertex = %name, dropped, column = %policy.column, "dropped unmatched rows");
    }

    let mut emissions = Vec::new();
    for (edge, rows) in outputs.iter().zip(buckets) {
        if rows.is_empty() {
            continue;
        }
        let subset = Dataset::from_rows(dataset.columns().to_vec(), rows)?;
        debug!(vertex = %name, edge = %edge, rows = subset.num_rows(), "dispatching partition");
        emissions.push((edge.clone(), subset));
    }
    Ok(emissions)
}

fn join_deliver(
    name: &str,
    outputs: &[String],
    policy: &JoinPolicy,
    left: &mut Option<Dataset>,
    right: &mut Option<Dataset>,
    envelope: Envelope,
) -> Result<Vec<(String, Dataset)>> {
    let edge = envelope.edge_name().to_string();
    let slot = if edge == policy.left_edge {
        &mut *left
    } else if edge == policy.right_edge {
        &mut *right
    } else {
        return Err(FlowError::routing(
            name,
            format!("edge '{edge}' is neither the left nor the right role"),
        ));
    };
    if slot.is_some() {
        return Err(FlowError::DuplicateDelivery {
            vertex: name.to_string(),
            edge,
        });
    }
    *slot = Some(envelope.into_dataset());

    let (Some(l), Some(r)) = (left.as_ref(), right.as_ref()) else {
        debug!(vertex = %name, edge = %edge, "join waiting for the other side");
        return Ok(Vec::new());
    };

    // Validate key columns before taking the slots so a failure leaves the
    // barrier as-is.
    let Some(l_idx) = l.column_index(&policy.on) else {
        return Err(FlowError::schema_mismatch(
            name,
            format!("key column '{}' not found on the left side", policy.on),
        ));
    };
    let Some(r_idx) = r.column_index(&policy.on) else {
        return Err(FlowError::schema_mismatch(
            name,
            format!("key column '{}' not found on the right side", policy.on),
        ));
    };

    let (Some(l), Some(r)) = (left.take(), right.take()) else {
        return Err(FlowError::routing(name, "join slots disappeared"));
    };
    let joined = join_datasets(&l, &r, l_idx, r_idx, policy.kind)?;
    debug!(vertex = %name, rows = joined.num_rows(), kind = ?policy.kind, "join complete");
    single_emission(name, outputs, joined)
}

/// Null keys never match, mirroring relational join semantics.
fn keys_match(a: &Value, b: &Value) -> bool {
    !a.is_null() && a == b
}

fn join_datasets(
    left: &Dataset,
    right: &Dataset,
    l_idx: usize,
    r_idx: usize,
    kind: JoinKind,
) -> Result<Dataset> {
    let mut columns = left.columns().to_vec();
    columns.extend(
        right
            .columns()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != r_idx)
            .map(|(_, c)| c.clone()),
    );
    let mut out = Dataset::new(columns);

    let right_side = |rrow: &[Value]| -> Vec<Value> {
        rrow.iter()
            .enumerate()
            .filter(|(i, _)| *i != r_idx)
            .map(|(_, v)| v.clone())
            .collect()
    };

    match kind {
        JoinKind::Inner | JoinKind::Left => {
            for lrow in left.rows() {
                let key = &lrow[l_idx];
                let mut matched = false;
                for rrow in right.rows() {
                    if keys_match(key, &rrow[r_idx]) {
                        matched = true;
                        let mut row = lrow.clone();
                        row.extend(right_side(rrow));
                        out.push_row(row)?;
                    }
                }
                if !matched && kind == JoinKind::Left {
                    let mut row = lrow.clone();
                    row.extend(std::iter::repeat(Value::Null).take(right.num_columns() - 1));
                    out.push_row(row)?;
                }
            }
        }
        JoinKind::Right => {
            for rrow in right.rows() {
                let key = &rrow[r_idx];
                let mut matched = false;
                for lrow in left.rows() {
                    if keys_match(&lrow[l_idx], key) {
                        matched = true;
                        let mut row = lrow.clone();
                        row.extend(right_side(rrow));
                        out.push_row(row)?;
                    }
                }
                if !matched {
                    let mut row: Vec<Value> = left
                        .columns()
                        .iter()
                        .enumerate()
                        .map(|(i, _)| if i == l_idx { key.clone() } else { Value::Null })
                        .collect();
                    row.extend(right_side(rrow));
                    out.push_row(row)?;
                }
            }
        }
    }
    Ok(out)
}
