use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::model::OnnxModel;
use crate::ops::{OperatorRegistry, Tensor, ValueShape};
use crate::optimization::graph_optimizer::{GraphOptimizer, OptimizationStats};
use crate::parser::graph_validator::GraphValidator;
use crate::parser::OnnxModelLoader;

use super::context::{ExecutionOptions, OptimizationLevel};
use super::plan::ExecutionPlan;

/// Runs a loaded model against concrete inputs
///
/// The model is validated, optionally optimized and compiled once; every
/// `run` afterwards only allocates its own value table, so one engine can
/// serve several threads at the same time.
#[derive(Debug)]
pub struct ExecutionEngine {
    /// The model as it is executed (after optimization)
    model: Arc<OnnxModel>,
    options: Arc<ExecutionOptions>,
    registry: Arc<OperatorRegistry>,
    plan: Arc<ExecutionPlan>,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
    optimization_stats: Option<OptimizationStats>,
}

impl ExecutionEngine {
    /// Create an engine with the built-in operators
    pub fn new(model: OnnxModel, options: ExecutionOptions) -> Result<Self> {
        Self::with_registry(
            model,
            options,
            Arc::new(OperatorRegistry::with_standard_operators()),
        )
    }

    /// Create an engine that dispatches through a caller-provided registry
    pub fn with_registry(
        model: OnnxModel,
        options: ExecutionOptions,
        registry: Arc<OperatorRegistry>,
    ) -> Result<Self> {
        GraphValidator::validate(&model.graph)?;
        Self::assemble(model, options, registry)
    }

    /// Optimize and compile a model whose graph has already been validated
    fn assemble(
        mut model: OnnxModel,
        options: ExecutionOptions,
        registry: Arc<OperatorRegistry>,
    ) -> Result<Self> {
        let optimization_stats = if options.optimization_level != OptimizationLevel::None {
            let optimizer =
                GraphOptimizer::for_level(options.optimization_level, options.optimization.clone());
            let stats = optimizer.optimize(&mut model.graph)?;
            info!(
                "Optimized graph '{}': {} nodes and {} initializers removed",
                model.graph.name,
                stats.nodes_removed(),
                stats.initializers_removed()
            );
            Some(stats)
        } else {
            None
        };

        let plan = ExecutionPlan::compile(&model.graph, &registry, &model.opset_imports)?;

        let thread_pool = if options.thread_count > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.thread_count)
                .build()
                .map_err(|e| Error::InvalidOptions(format!("Unable to build thread pool: {}", e)))?;
            Some(Arc::new(pool))
        } else {
            None
        };

        debug!(
            "Created engine for graph '{}' with {} steps",
            model.graph.name,
            plan.steps().len()
        );

        Ok(Self {
            model: Arc::new(model),
            options: Arc::new(options),
            registry,
            plan: Arc::new(plan),
            thread_pool,
            optimization_stats,
        })
    }

    /// Load a serialized model and build an engine for it
    pub fn from_bytes(bytes: &[u8], options: ExecutionOptions) -> Result<Self> {
        Self::from_loaded(OnnxModelLoader::load_model_from_bytes(bytes)?, options)
    }

    pub fn from_reader<R: Read>(reader: R, options: ExecutionOptions) -> Result<Self> {
        Self::from_loaded(OnnxModelLoader::load_model_from_reader(reader)?, options)
    }

    pub fn from_path<P: AsRef<Path>>(path: P, options: ExecutionOptions) -> Result<Self> {
        Self::from_loaded(OnnxModelLoader::load_model(path.as_ref())?, options)
    }

    // The loader validates every graph it returns
    fn from_loaded(model: OnnxModel, options: ExecutionOptions) -> Result<Self> {
        Self::assemble(
            model,
            options,
            Arc::new(OperatorRegistry::with_standard_operators()),
        )
    }

    /// Run the model and return its declared outputs by name
    pub fn run(&self, inputs: HashMap<String, Tensor>) -> Result<HashMap<String, Tensor>> {
        self.plan.execute(inputs, &self.options)
    }

    /// Run once with eager cleanup switched on or off
    pub fn run_with_options(
        &self,
        inputs: HashMap<String, Tensor>,
        eager_cleanup: bool,
    ) -> Result<HashMap<String, Tensor>> {
        let options = self.options.as_ref().clone().set_eager_cleanup(eager_cleanup);
        self.plan.execute(inputs, &options)
    }

    /// Run independent input sets in parallel; results keep the input order
    pub fn run_batch(
        &self,
        batch: Vec<HashMap<String, Tensor>>,
    ) -> Result<Vec<HashMap<String, Tensor>>> {
        let run_all = || {
            batch
                .into_par_iter()
                .map(|inputs| self.run(inputs))
                .collect::<Result<Vec<_>>>()
        };
        match &self.thread_pool {
            Some(pool) => pool.install(run_all),
            None => run_all(),
        }
    }

    /// Types and shapes of every value, as far as kernels can tell without data
    pub fn infer_shapes(&self) -> Result<HashMap<String, ValueShape>> {
        self.plan.infer_shapes()
    }

    /// Serialize the executed model back to ONNX bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        OnnxModelLoader::save_model_to_bytes(&self.model)
    }

    pub fn input_names(&self) -> &[String] {
        self.plan.input_names()
    }

    pub fn output_names(&self) -> &[String] {
        self.plan.output_names()
    }

    pub fn model(&self) -> Arc<OnnxModel> {
        Arc::clone(&self.model)
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Pass statistics when the engine optimized the model
    pub fn optimization_stats(&self) -> Option<&OptimizationStats> {
        self.optimization_stats.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataType, Graph, Node, TensorInfo};

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_engine_is_shareable() {
        assert_send_sync::<ExecutionEngine>();
    }

    #[test]
    fn test_thread_count_builds_a_pool() {
        let graph = Graph {
            name: "neg".to_string(),
            nodes: vec![Node::new("Neg", ["x"], ["y"])],
            inputs: vec![TensorInfo::new("x", DataType::Float, None)],
            outputs: vec![TensorInfo::new("y", DataType::Float, None)],
            ..Graph::default()
        };
        let engine = ExecutionEngine::new(
            OnnxModel::from_graph(graph),
            ExecutionOptions::new().set_thread_count(2),
        )
        .unwrap();

        let batch = (0..4)
            .map(|i| {
                let mut inputs = HashMap::new();
                inputs.insert("x".to_string(), Tensor::from_shape_vec(&[1], vec![i as f32]).unwrap());
                inputs
            })
            .collect();
        let results = engine.run_batch(batch).unwrap();
        let ys: Vec<Tensor> = results.into_iter().map(|mut r| r.remove("y").unwrap()).collect();
        assert_eq!(ys[3], Tensor::from_shape_vec(&[1], vec![-3.0f32]).unwrap());
    }
}
