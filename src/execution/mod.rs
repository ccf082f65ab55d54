pub mod backend;
pub mod context;
pub mod engine;
pub mod plan;
pub mod sequencer;

pub use backend::{EngineRuntime, ExternalRuntime, ExternalSession, WholeSession};
pub use context::{ExecutionOptions, OptimizationLevel, ValueTable};
pub use engine::ExecutionEngine;
pub use plan::ExecutionPlan;
pub use sequencer::{Instruction, InstructionSequence, Sequencer};
