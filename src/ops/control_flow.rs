//! Operators that execute nested graphs.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::execution::plan::ExecutionPlan;
use crate::model::{self, DataType, Dimension, Node, TensorInfo};
use crate::ops::attributes::{check_arity, Attributes};
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator};
use crate::ops::tensor::Tensor;

/// If operator: runs `then_branch` or `else_branch` depending on a boolean scalar
#[derive(Debug, Clone, Copy, Default)]
pub struct If;

#[derive(Debug)]
pub struct IfKernel {
    then_branch: Arc<ExecutionPlan>,
    else_branch: Arc<ExecutionPlan>,
}

impl Operator for If {
    fn build(&self, node: &Node, cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        let attrs = Attributes::new(node);
        let then_graph = attrs.required_graph("then_branch")?;
        let else_graph = attrs.required_graph("else_branch")?;

        for (attr, graph) in [("then_branch", then_graph), ("else_branch", else_graph)] {
            if graph.outputs.len() != node.outputs.len() {
                return Err(Error::attribute(
                    "If",
                    attr,
                    format!(
                        "branch produces {} outputs but the node declares {}",
                        graph.outputs.len(),
                        node.outputs.len()
                    ),
                ));
            }
        }

        Ok(Box::new(IfKernel {
            then_branch: cx.compile_subgraph(then_graph)?,
            else_branch: cx.compile_subgraph(else_graph)?,
        }))
    }
}

impl Kernel for IfKernel {
    fn compute(&self, inputs: OpInputs<'_>, ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let condition = inputs.require(0, "If")?.as_scalar_bool()?;
        let branch = if condition {
            &self.then_branch
        } else {
            &self.else_branch
        };
        ctx.run_subgraph(branch, Vec::new())
    }
}

/// Scan operator (opset 9 and later) iterating along axis 0 in forward order
#[derive(Debug, Clone, Copy, Default)]
pub struct Scan;

#[derive(Debug)]
pub struct ScanKernel {
    body: Arc<ExecutionPlan>,
    num_state: usize,
    num_scan_inputs: usize,
    /// Declared per-step outputs, used to shape the results of an empty scan
    scan_outputs: Vec<TensorInfo>,
}

/// Reject axis/direction attributes other than the forward, axis-0 defaults
fn check_default_layout(attrs: &Attributes<'_>, name: &str) -> Result<()> {
    if let Some(values) = attrs.ints(name)? {
        if values.iter().any(|&v| v != 0) {
            return Err(Error::UnsupportedFeature(format!(
                "Scan attribute {}={:?} is not supported",
                name, values
            )));
        }
    }
    Ok(())
}

impl Operator for Scan {
    fn build(&self, node: &Node, cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, usize::MAX, 1)?;
        let attrs = Attributes::new(node);
        let body = attrs.required_graph("body")?;
        let num_scan_inputs = attrs.required_int("num_scan_inputs")?;

        let num_scan_inputs = usize::try_from(num_scan_inputs)
            .ok()
            .filter(|&m| m >= 1 && m <= node.inputs.len())
            .ok_or_else(|| {
                Error::attribute(
                    "Scan",
                    "num_scan_inputs",
                    format!("{} is not in 1..={}", num_scan_inputs, node.inputs.len()),
                )
            })?;
        let num_state = node.inputs.len() - num_scan_inputs;

        for name in [
            "scan_input_axes",
            "scan_input_directions",
            "scan_output_axes",
            "scan_output_directions",
        ] {
            check_default_layout(&attrs, name)?;
        }

        if body.inputs.len() != node.inputs.len() {
            return Err(Error::attribute(
                "Scan",
                "body",
                format!(
                    "body takes {} inputs but the node passes {}",
                    body.inputs.len(),
                    node.inputs.len()
                ),
            ));
        }
        if body.outputs.len() < num_state || body.outputs.len() != node.outputs.len() {
            return Err(Error::attribute(
                "Scan",
                "body",
                format!(
                    "body produces {} outputs, expected {} matching the node",
                    body.outputs.len(),
                    node.outputs.len()
                ),
            ));
        }

        Ok(Box::new(ScanKernel {
            body: cx.compile_subgraph(body)?,
            num_state,
            num_scan_inputs,
            scan_outputs: body.outputs[num_state..].to_vec(),
        }))
    }
}

impl Kernel for ScanKernel {
    fn compute(&self, inputs: OpInputs<'_>, ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let mut states = (0..self.num_state)
            .map(|i| inputs.require(i, "Scan").map(Tensor::clone))
            .collect::<Result<Vec<Tensor>>>()?;
        let scans = (self.num_state..self.num_state + self.num_scan_inputs)
            .map(|i| inputs.require(i, "Scan"))
            .collect::<Result<Vec<&Tensor>>>()?;

        let sequence_len = match scans[0].shape().first() {
            Some(&len) => len,
            None => {
                return Err(Error::ValidationError(
                    "Scan inputs must have at least one dimension".to_string(),
                ))
            }
        };
        if let Some(bad) = scans.iter().find(|s| s.shape().first() != Some(&sequence_len)) {
            return Err(Error::ValidationError(format!(
                "Scan inputs disagree on sequence length: {} vs {}",
                sequence_len,
                bad.describe()
            )));
        }
        if sequence_len == 0 {
            let mut results = states;
            for info in &self.scan_outputs {
                results.push(empty_scan_output(info)?);
            }
            return Ok(results);
        }

        let num_outputs = self.body.output_names().len();
        let mut scan_outputs: Vec<Vec<Tensor>> = vec![Vec::with_capacity(sequence_len); num_outputs - self.num_state];

        for step in 0..sequence_len {
            let mut args = std::mem::take(&mut states);
            for scan in &scans {
                args.push(scan.index_axis0(step)?);
            }
            let mut outputs = ctx.run_subgraph(&self.body, args)?;
            if outputs.len() != num_outputs {
                return Err(Error::LogicError(format!(
                    "Scan body returned {} values, expected {}",
                    outputs.len(),
                    num_outputs
                )));
            }
            let per_step = outputs.split_off(self.num_state);
            states = outputs;
            for (collected, value) in scan_outputs.iter_mut().zip(per_step) {
                collected.push(value);
            }
        }

        let mut results = states;
        for collected in scan_outputs {
            results.push(Tensor::stack(&collected)?);
        }
        Ok(results)
    }
}

/// `[0, ..dims]` tensor for a body output that never ran
fn empty_scan_output(info: &TensorInfo) -> Result<Tensor> {
    let static_dims = info.shape.as_ref().and_then(|shape| {
        shape
            .iter()
            .map(|d| match d {
                Dimension::Value(v) if *v >= 0 => Some(*v),
                _ => None,
            })
            .collect::<Option<Vec<i64>>>()
    });
    match static_dims {
        Some(step_dims) if info.data_type != DataType::Undefined => {
            let mut dims = vec![0];
            dims.extend(step_dims);
            Tensor::from_model_tensor(&model::Tensor::new(&info.name, info.data_type, dims, Vec::new()))
        }
        _ => Err(Error::ValidationError(format!(
            "Scan over an empty sequence needs a static type and shape for body output '{}' ({})",
            info.name,
            info.type_string()
        ))),
    }
}
