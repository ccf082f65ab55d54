//! Delegation of a whole serialized model to another graph runtime.

use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::ops::Tensor;
use crate::parser::OnnxModelLoader;

use super::context::ExecutionOptions;
use super::engine::ExecutionEngine;

/// A runtime able to load serialized ONNX bytes
pub trait ExternalRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// Create a session; the error message is reported to the caller
    fn load(&self, model: &[u8]) -> std::result::Result<Box<dyn ExternalSession>, String>;
}

/// A model loaded by an external runtime
pub trait ExternalSession: Send + Sync {
    /// Names of the values `run` returns, in order
    fn output_names(&self) -> Vec<String>;

    fn run(
        &self,
        inputs: HashMap<String, Tensor>,
    ) -> std::result::Result<HashMap<String, Tensor>, String>;
}

/// Runs a whole model through an external runtime, which handles the graph logic itself
pub struct WholeSession {
    runtime: String,
    session: Box<dyn ExternalSession>,
}

impl fmt::Debug for WholeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WholeSession")
            .field("runtime", &self.runtime)
            .field("outputs", &self.session.output_names())
            .finish()
    }
}

impl WholeSession {
    pub fn new(model: &[u8], runtime: &dyn ExternalRuntime) -> Result<Self> {
        match runtime.load(model) {
            Ok(session) => {
                debug!("Created {} session", runtime.name());
                Ok(Self {
                    runtime: runtime.name().to_string(),
                    session,
                })
            }
            Err(reason) => {
                warn!("{} refused the model: {}", runtime.name(), reason);
                Err(Error::BackendUnavailable(format!(
                    "Unable to create session due to '{}'{}",
                    reason,
                    describe_model(model)
                )))
            }
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn output_names(&self) -> Vec<String> {
        self.session.output_names()
    }

    /// Outputs in the order the session declares them
    pub fn run(&self, inputs: HashMap<String, Tensor>) -> Result<Vec<Tensor>> {
        let mut results = self
            .session
            .run(inputs)
            .map_err(|reason| Error::BackendExecution(format!("{}: {}", self.runtime, reason)))?;
        self.session
            .output_names()
            .into_iter()
            .map(|name| {
                results.remove(&name).ok_or_else(|| {
                    Error::BackendExecution(format!(
                        "{} did not return output '{}'",
                        self.runtime, name
                    ))
                })
            })
            .collect()
    }
}

/// Short description of the rejected model, when the bytes decode at all
fn describe_model(model: &[u8]) -> String {
    match OnnxModelLoader::load_model_from_bytes(model) {
        Ok(model) => format!(
            " for graph '{}' ({} nodes, {} inputs, {} outputs)",
            model.graph.name,
            model.graph.nodes.len(),
            model.graph.inputs.len(),
            model.graph.outputs.len()
        ),
        Err(_) => String::new(),
    }
}

/// This crate's own engine exposed as an external runtime
#[derive(Debug, Clone, Default)]
pub struct EngineRuntime {
    options: ExecutionOptions,
}

impl EngineRuntime {
    pub fn new(options: ExecutionOptions) -> Self {
        Self { options }
    }
}

struct EngineSession(ExecutionEngine);

impl ExternalRuntime for EngineRuntime {
    fn name(&self) -> &str {
        "onnx-graph-engine"
    }

    fn load(&self, model: &[u8]) -> std::result::Result<Box<dyn ExternalSession>, String> {
        let engine = ExecutionEngine::from_bytes(model, self.options.clone()).map_err(|e| e.to_string())?;
        Ok(Box::new(EngineSession(engine)))
    }
}

impl ExternalSession for EngineSession {
    fn output_names(&self) -> Vec<String> {
        self.0.output_names().to_vec()
    }

    fn run(
        &self,
        inputs: HashMap<String, Tensor>,
    ) -> std::result::Result<HashMap<String, Tensor>, String> {
        self.0.run(inputs).map_err(|e| e.to_string())
    }
}
