use sluice_core::{DispatchPolicy, FlowError, Graph, JoinPolicy, Result};
use sluice_ops::{sink, source, transform};

use crate::config::{PipelineConfig, VertexKind};

/// Build a graph from a pipeline definition. Wiring errors (arity
/// violations, double-attached edges, unknown names) surface here, before
/// anything runs.
pub fn build_graph(config: &PipelineConfig) -> Result<Graph> {
    let mut graph = Graph::new();
    for vertex in &config.vertex {
        let name = vertex.name.as_str();
        match &vertex.kind {
            VertexKind::Sequence { length } => {
                graph.add_source(name, source::sequence(*length))?;
            }
            VertexKind::CsvSource { path } => {
                graph.add_source(name, source::csv_file(path.clone()))?;
            }
            VertexKind::Filter { column, op, value } => {
                graph.add_transform(name, transform::filter(column.clone(), *op, value.clone())?)?;
            }
            VertexKind::SelectColumns { columns } => {
                graph.add_transform(name, transform::select_columns(columns.clone())?)?;
            }
            VertexKind::DropColumns { columns } => {
                graph.add_transform(name, transform::drop_columns(columns.clone())?)?;
            }
            VertexKind::Dedup {
                key,
                sort_by,
                order,
                keep,
            } => {
                graph.add_transform(
                    name,
                    transform::dedup(key.clone(), sort_by.clone(), *order, *keep),
                )?;
            }
            VertexKind::Aggregate {
                group_by,
                out_column,
                agg,
                input_column,
            } => {
                graph.add_transform(
                    name,
                    transform::aggregate(
                        group_by.clone(),
                        out_column.clone(),
                        *agg,
                        input_column.clone(),
                    )?,
                )?;
            }
            VertexKind::Merge => graph.add_merge(name)?,
            VertexKind::Broadcast => graph.add_broadcast(name)?,
            VertexKind::Dispatch {
                column,
                route,
                default,
                strict,
            } => {
                let mut policy = DispatchPolicy::on_column(column.clone());
                for entry in route {
                    policy = policy.route(entry.value.clone(), entry.edge.clone());
                }
                if let Some(edge) = default {
                    policy = policy.otherwise(edge.clone());
                }
                if *strict {
                    policy = policy.strict();
                }
                graph.add_dispatch(name, policy)?;
            }
            VertexKind::Join {
                on,
                left,
                right,
                join,
            } => {
                graph.add_join(
                    name,
                    JoinPolicy::new(on.clone(), left.clone(), right.clone(), *join),
                )?;
            }
            VertexKind::Print => graph.add_sink(name, sink::print())?,
            VertexKind::CsvSink { path } => {
                graph.add_sink(name, sink::csv_file(path.clone()))?;
            }
        }
    }
    for edge in &config.edge {
        graph.connect(&edge.from, &edge.name, &edge.to)?;
    }
    Ok(graph)
}

/// Assemble, validate, and pump every configured source in order.
pub fn run_pipeline(config: &PipelineConfig) -> Result<()> {
    if config.sources.is_empty() {
        return Err(FlowError::Config(
            "pipeline lists no sources to pump".to_string(),
        ));
    }
    let mut graph = build_graph(config)?;
    graph.validate()?;
    for source in &config.sources {
        graph.pump(source)?;
    }
    Ok(())
}

/// Assemble and validate without pumping anything.
pub fn check_pipeline(config: &PipelineConfig) -> Result<Graph> {
    let graph = build_graph(config)?;
    graph.validate()?;
    Ok(graph)
}
