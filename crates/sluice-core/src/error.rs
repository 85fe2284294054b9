use thiserror::Error;

/// Boxed error type that collaborators hand back to the engine.
///
/// Source, transform, and sink closures translate their own failures
/// (file I/O, parse errors, whatever they wrap) into this; the engine
/// wraps it into [`FlowError::Collaborator`] with the vertex name.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum FlowError {
    // Assembly / trigger errors
    #[error("connectivity error at vertex '{vertex}': {message}")]
    Connectivity { vertex: String, message: String },

    #[error("unknown vertex '{0}'")]
    UnknownVertex(String),

    #[error("unknown edge '{0}'")]
    UnknownEdge(String),

    // Execution errors
    #[error("schema mismatch at vertex '{vertex}': {message}")]
    SchemaMismatch { vertex: String, message: String },

    #[error("routing error at vertex '{vertex}': {message}")]
    Routing { vertex: String, message: String },

    #[error("duplicate delivery on edge '{edge}' at vertex '{vertex}' before its barrier completed")]
    DuplicateDelivery { vertex: String, edge: String },

    #[error("collaborator failed at vertex '{vertex}': {source}")]
    Collaborator {
        vertex: String,
        #[source]
        source: BoxError,
    },

    // Dataset construction errors
    #[error("malformed dataset: {0}")]
    MalformedDataset(String),

    // Configuration errors (operator parameters, pipeline files)
    #[error("config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FlowError {
    pub fn connectivity(vertex: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            vertex: vertex.into(),
            message: message.into(),
        }
    }

    pub fn schema_mismatch(vertex: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            vertex: vertex.into(),
            message: message.into(),
        }
    }

    pub fn routing(vertex: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Routing {
            vertex: vertex.into(),
            message: message.into(),
        }
    }

    pub fn collaborator(vertex: impl Into<String>, source: BoxError) -> Self {
        Self::Collaborator {
            vertex: vertex.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
