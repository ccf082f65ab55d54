use thiserror::Error;
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Why the sequencer could not order every node of a graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleFailure {
    /// Two nodes claim the same output name
    DuplicateOutput { name: String, node: String },
    /// A node reads a name nothing in scope can provide
    Unresolved { node: String, input: String },
    /// The remaining nodes depend on each other
    Cycle { nodes: Vec<String> },
}

impl fmt::Display for ScheduleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleFailure::DuplicateOutput { name, node } => {
                write!(f, "node '{}' redefines output '{}'", node, name)
            }
            ScheduleFailure::Unresolved { node, input } => {
                write!(f, "node '{}' reads unresolved name '{}'", node, input)
            }
            ScheduleFailure::Cycle { nodes } => {
                write!(f, "cycle between nodes [{}]", nodes.join(", "))
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Protobuf parsing error: {0}")]
    ProtobufError(#[from] prost::DecodeError),

    #[error("Protobuf encoding error: {0}")]
    ProtobufEncodeError(#[from] prost::EncodeError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Failed to load model from {0}: {1}")]
    ModelLoadError(PathBuf, String),

    #[error("Invalid ONNX model: {0}")]
    InvalidModel(String),

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    #[error("Invalid graph structure: {0}")]
    StructuralError(String),

    #[error("Unable to schedule graph: {0}")]
    CyclicOrUnresolvedGraph(ScheduleFailure),

    #[error("Unsupported operator {domain}::{op_type} (opset {version})")]
    UnsupportedOperator {
        op_type: String,
        domain: String,
        version: i64,
    },

    #[error("Invalid operator registration: {0}")]
    InvalidOperator(String),

    #[error("Invalid attribute '{attribute}' for operator {op_type}: {reason}")]
    AttributeError {
        op_type: String,
        attribute: String,
        reason: String,
    },

    #[error("Missing required input '{0}'")]
    MissingInput(String),

    #[error("Input '{0}' is not declared by the graph")]
    UnknownInput(String),

    #[error("Input '{name}' expects {expected} but received {actual}")]
    InputTypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Node '{node}' reads '{name}' which is not in the value table")]
    DanglingReference { node: String, name: String },

    #[error("Internal logic error: {0}")]
    LogicError(String),

    #[error("Operator {op_type} failed in node '{node}' with arguments [{arguments}]: {source}")]
    OperatorExecution {
        node: String,
        op_type: String,
        arguments: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend execution failed: {0}")]
    BackendExecution(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl Error {
    /// Shorthand used by kernels when an attribute is missing or malformed
    pub fn attribute(op_type: &str, attribute: &str, reason: impl Into<String>) -> Self {
        Error::AttributeError {
            op_type: op_type.to_string(),
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that indicate a bug in the scheduler or engine rather than bad input
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::DanglingReference { .. } | Error::LogicError(_))
    }

    /// Innermost error of an operator execution chain
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::OperatorExecution { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
