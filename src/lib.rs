pub mod error;
pub mod execution;
pub mod model;
pub mod ops;
pub mod optimization;
pub mod parser;
pub mod proto;
pub mod tools;

// Re-export commonly used types
pub use error::{Error, Result, ScheduleFailure};
pub use execution::backend::{EngineRuntime, ExternalRuntime, ExternalSession, WholeSession};
pub use execution::context::{ExecutionOptions, OptimizationLevel};
pub use execution::engine::ExecutionEngine;
pub use execution::plan::ExecutionPlan;
pub use model::{
    Attribute, DataType, Dimension, Graph, ModelMetadata, Node, NodeId, OnnxModel, Tensor,
    TensorInfo,
};
pub use ops::registry::{Operator, OperatorRegistry};
pub use ops::tensor::Tensor as ComputeTensor;
pub use optimization::graph_optimizer::{
    GraphOptimizer, OptimizationOptions, OptimizationPass, OptimizationStats, PassResult,
};
pub use parser::{GraphBuilder, OnnxModelLoader};
