//! Compiled, immutable form of a graph and the loop that runs it.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::model::{DataType, Graph, NodeId, TensorInfo};
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, OperatorRegistry, ValueShape};
use crate::ops::tensor::Tensor;

use super::context::{ExecutionOptions, ValueTable};
use super::sequencer::Sequencer;

/// A node bound to its kernel, in execution order
#[derive(Debug)]
pub struct Step {
    pub node: NodeId,
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub kernel: Box<dyn Kernel>,
    /// Input positions the kernel may overwrite
    pub inplace: &'static [usize],
    /// Local values read for the last time by this step
    pub release: Vec<String>,
}

/// Everything needed to run a graph: ordered steps, bound kernels and decoded initializers
#[derive(Debug)]
pub struct ExecutionPlan {
    graph_name: String,
    inputs: Vec<TensorInfo>,
    input_names: Vec<String>,
    output_names: Vec<String>,
    initializers: HashMap<String, Tensor>,
    steps: Vec<Step>,
}

impl ExecutionPlan {
    /// Compile a top-level graph. Structural checks are left to the caller
    /// (see `GraphValidator`); the sequencer still rejects unschedulable graphs.
    pub fn compile(
        graph: &Graph,
        registry: &OperatorRegistry,
        opset_imports: &HashMap<String, i64>,
    ) -> Result<Self> {
        Self::compile_scoped(graph, registry, opset_imports, &HashSet::new())
    }

    /// Compile a graph whose free names resolve against `outer`
    pub fn compile_scoped(
        graph: &Graph,
        registry: &OperatorRegistry,
        opset_imports: &HashMap<String, i64>,
        outer: &HashSet<String>,
    ) -> Result<Self> {
        let sequence = Sequencer::new(graph, outer).sequence()?;

        let mut initializers = HashMap::with_capacity(graph.initializers.len());
        for init in &graph.initializers {
            initializers.insert(init.name.clone(), Tensor::from_model_tensor(init)?);
        }

        let mut visible = outer.clone();
        visible.extend(graph.local_names());
        let mut cx = BuildContext::new(registry, opset_imports, visible);

        let mut steps = Vec::with_capacity(sequence.len());
        for instruction in sequence.instructions {
            let node = &graph.nodes[instruction.node];
            let resolved = registry.resolve_node(node, opset_imports)?;
            let kernel = resolved.operator.build(node, &mut cx)?;
            trace!(
                "Bound node '{}' to {} (since opset {})",
                node.name,
                node.op_type,
                resolved.since_version
            );
            steps.push(Step {
                node: instruction.node,
                name: node.name.clone(),
                op_type: node.op_type.clone(),
                inputs: node.inputs.clone(),
                outputs: node.outputs.clone(),
                kernel,
                inplace: resolved.inplace,
                release: instruction.release,
            });
        }

        debug!(
            "Compiled graph '{}': {} steps, {} initializers",
            graph.name,
            steps.len(),
            initializers.len()
        );

        Ok(Self {
            graph_name: graph.name.clone(),
            inputs: graph.inputs.clone(),
            input_names: graph.input_names(),
            output_names: graph.output_names(),
            initializers,
            steps,
        })
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn initializers(&self) -> &HashMap<String, Tensor> {
        &self.initializers
    }

    /// Declared inputs the caller has to supply
    pub fn required_inputs(&self) -> impl Iterator<Item = &str> {
        self.input_names
            .iter()
            .map(String::as_str)
            .filter(|name| !self.initializers.contains_key(*name))
    }

    /// Run the graph with named inputs and return its declared outputs
    pub fn execute(
        &self,
        inputs: HashMap<String, Tensor>,
        options: &ExecutionOptions,
    ) -> Result<HashMap<String, Tensor>> {
        for name in self.required_inputs() {
            if !inputs.contains_key(name) {
                return Err(Error::MissingInput(name.to_string()));
            }
        }

        let mut table = ValueTable::new(None);
        self.seed(&mut table);
        for (name, tensor) in inputs {
            let declared = self
                .inputs
                .iter()
                .find(|i| i.name == name)
                .ok_or_else(|| Error::UnknownInput(name.clone()))?;
            check_input_type(declared, &tensor)?;
            table.insert(name, Cow::Owned(tensor));
        }

        self.run_steps(&mut table, options)?;

        let values = self.extract_outputs(&mut table)?;
        Ok(self.output_names.iter().cloned().zip(values).collect())
    }

    /// Metadata-only propagation of types and shapes through the kernels
    pub fn infer_shapes(&self) -> Result<HashMap<String, ValueShape>> {
        let mut shapes: HashMap<String, ValueShape> = HashMap::new();
        for (name, tensor) in &self.initializers {
            shapes.insert(name.clone(), ValueShape::of(tensor));
        }
        for input in &self.inputs {
            shapes
                .entry(input.name.clone())
                .or_insert_with(|| ValueShape::new(input.data_type, input.shape.clone()));
        }

        for step in &self.steps {
            let known: Vec<Option<ValueShape>> = step
                .inputs
                .iter()
                .map(|name| shapes.get(name).cloned())
                .collect();
            let inferred = step.kernel.infer_shapes(&known)?;
            for (name, shape) in step.outputs.iter().zip(inferred) {
                if let (false, Some(shape)) = (name.is_empty(), shape) {
                    shapes.insert(name.clone(), shape);
                }
            }
        }
        Ok(shapes)
    }

    fn seed<'p>(&'p self, table: &mut ValueTable<'p>) {
        for (name, tensor) in &self.initializers {
            table.insert(name.clone(), Cow::Borrowed(tensor));
        }
    }

    fn run_steps<'p>(&'p self, table: &mut ValueTable<'p>, options: &ExecutionOptions) -> Result<()> {
        for step in &self.steps {
            // Buffers handed to the kernel so it can overwrite them
            let mut handed_over: Vec<(usize, Tensor)> = Vec::new();
            if options.enable_inplace {
                for &position in step.inplace {
                    let name = match step.inputs.get(position) {
                        Some(name) if !name.is_empty() => name,
                        _ => continue,
                    };
                    let single_use = step.inputs.iter().filter(|n| *n == name).count() == 1;
                    if single_use && step.release.contains(name) {
                        if let Some(tensor) = table.take_owned(name) {
                            trace!("Node '{}' reuses the buffer of '{}'", step.name, name);
                            handed_over.push((position, tensor));
                        }
                    }
                }
            }
            let handed_summary: Vec<(usize, String)> =
                handed_over.iter().map(|(i, t)| (*i, t.describe())).collect();

            let result = {
                let mut args = Vec::with_capacity(step.inputs.len());
                for (position, name) in step.inputs.iter().enumerate() {
                    if name.is_empty() {
                        args.push(None);
                    } else if let Some(index) = handed_over.iter().position(|(i, _)| *i == position) {
                        let (_, tensor) = handed_over.swap_remove(index);
                        args.push(Some(Cow::Owned(tensor)));
                    } else {
                        let value = table.get(name).ok_or_else(|| Error::DanglingReference {
                            node: step.name.clone(),
                            name: name.clone(),
                        })?;
                        args.push(Some(Cow::Borrowed(value)));
                    }
                }
                let ctx = ComputeContext::new(&*table, options, &step.name);
                step.kernel.compute(OpInputs::new(args), &ctx)
            };

            let results = result.map_err(|source| Error::OperatorExecution {
                node: step.name.clone(),
                op_type: step.op_type.clone(),
                arguments: summarize_arguments(step, &*table, &handed_summary),
                source: Box::new(source),
            })?;

            if results.len() < step.outputs.len() {
                return Err(Error::LogicError(format!(
                    "Node '{}' ({}) returned {} values for {} outputs",
                    step.name,
                    step.op_type,
                    results.len(),
                    step.outputs.len()
                )));
            }
            for (name, value) in step.outputs.iter().zip(results) {
                if !name.is_empty() {
                    table.insert(name.clone(), Cow::Owned(value));
                }
            }

            if options.eager_cleanup {
                for name in &step.release {
                    table.evict(name);
                }
            }
        }
        Ok(())
    }

    /// Declared outputs in order; repeated names get a copy
    fn extract_outputs(&self, table: &mut ValueTable<'_>) -> Result<Vec<Tensor>> {
        let mut outputs = Vec::with_capacity(self.output_names.len());
        for (i, name) in self.output_names.iter().enumerate() {
            let repeated_later = self.output_names[i + 1..].contains(name);
            let value = if !repeated_later && table.contains_local(name) {
                table.take_local(name)
            } else {
                table.get(name).cloned()
            };
            let value = value.ok_or_else(|| {
                Error::LogicError(format!(
                    "Output '{}' of graph '{}' was never produced",
                    name, self.graph_name
                ))
            })?;
            outputs.push(value);
        }
        Ok(outputs)
    }
}

/// Run a nested plan with positional inputs inside `parent`'s scope
pub(crate) fn execute_subgraph<'a>(
    plan: &'a ExecutionPlan,
    inputs: Vec<Tensor>,
    parent: &'a ValueTable<'a>,
    options: &ExecutionOptions,
) -> Result<Vec<Tensor>> {
    if inputs.len() != plan.inputs.len() {
        return Err(Error::ValidationError(format!(
            "Subgraph '{}' takes {} inputs, got {}",
            plan.graph_name,
            plan.inputs.len(),
            inputs.len()
        )));
    }

    let mut table = ValueTable::new(Some(parent));
    plan.seed(&mut table);
    for (declared, tensor) in plan.inputs.iter().zip(inputs) {
        check_input_type(declared, &tensor)?;
        table.insert(declared.name.clone(), Cow::Owned(tensor));
    }

    plan.run_steps(&mut table, options)?;
    plan.extract_outputs(&mut table)
}

fn check_input_type(declared: &TensorInfo, tensor: &Tensor) -> Result<()> {
    if declared.data_type != DataType::Undefined && declared.data_type != tensor.data_type() {
        return Err(Error::InputTypeMismatch {
            name: declared.name.clone(),
            expected: declared.type_string(),
            actual: tensor.describe(),
        });
    }
    Ok(())
}

fn summarize_arguments(step: &Step, table: &ValueTable<'_>, handed_over: &[(usize, String)]) -> String {
    step.inputs
        .iter()
        .enumerate()
        .map(|(position, name)| {
            if name.is_empty() {
                return "<omitted>".to_string();
            }
            let described = handed_over
                .iter()
                .find(|(i, _)| *i == position)
                .map(|(_, d)| d.clone())
                .or_else(|| table.get(name).map(Tensor::describe))
                .unwrap_or_else(|| "<absent>".to_string());
            format!("{}: {}", name, described)
        })
        .collect::<Vec<_>>()
        .join(", ")
}
