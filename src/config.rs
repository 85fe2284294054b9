use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use sluice_core::{FlowError, JoinKind, Result};
use sluice_ops::{AggKind, FilterOp, Keep, SortOrder};

/// Top-level pipeline definition, loaded from a TOML file.
///
/// A pipeline is `[[vertex]]` tables naming built-in operators, `[[edge]]`
/// tables wiring them, and the list of sources to pump when it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub vertex: Vec<VertexConfig>,
    #[serde(default)]
    pub edge: Vec<EdgeConfig>,
    /// Sources to pump, in order, when the pipeline runs.
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexConfig {
    pub name: String,
    #[serde(flatten)]
    pub kind: VertexKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub name: String,
    pub from: String,
    pub to: String,
}

/// One value → output-edge entry of a dispatch vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub value: Value,
    pub edge: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum VertexKind {
    Sequence {
        length: usize,
    },
    CsvSource {
        path: PathBuf,
    },
    Filter {
        column: String,
        op: FilterOp,
        value: Value,
    },
    SelectColumns {
        columns: Vec<String>,
    },
    DropColumns {
        columns: Vec<String>,
    },
    Dedup {
        key: String,
        sort_by: String,
        #[serde(default)]
        order: SortOrder,
        #[serde(default)]
        keep: Keep,
    },
    Aggregate {
        group_by: String,
        out_column: String,
        agg: AggKind,
        #[serde(default)]
        input_column: Option<String>,
    },
    Merge,
    Broadcast,
    Dispatch {
        column: String,
        #[serde(default)]
        route: Vec<RouteConfig>,
        #[serde(default)]
        default: Option<String>,
        #[serde(default)]
        strict: bool,
    },
    Join {
        on: String,
        left: String,
        right: String,
        #[serde(default)]
        join: JoinKind,
    },
    Print,
    CsvSink {
        path: PathBuf,
    },
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| FlowError::Config(format!("{}: {e}", path.display())))
    }
}
