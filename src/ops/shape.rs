//! Identity, constants and shape manipulation.

use crate::error::{Error, Result};
use crate::model::{DataType, Dimension, Node};
use crate::ops::attributes::{check_arity, Attributes};
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator, ValueShape};
use crate::ops::tensor::{normalize_axis, Tensor};

/// Identity operator; forwards its input buffer when the engine hands over ownership
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Operator for Identity {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        Ok(Box::new(*self))
    }

    fn inplace_inputs(&self) -> &'static [usize] {
        &[0]
    }
}

impl Kernel for Identity {
    fn compute(&self, mut inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        Ok(vec![inputs.take(0, "Identity")?.into_owned()])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(vec![inputs.first().cloned().flatten()])
    }
}

/// Constant operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Constant;

/// The decoded constant value
#[derive(Debug, Clone)]
pub struct ConstantKernel {
    value: Tensor,
}

impl Operator for Constant {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 0, 0, 1)?;
        let attrs = Attributes::new(node);
        let value_keys = ["value", "value_float", "value_floats", "value_int", "value_ints"];
        let present: Vec<&str> = value_keys.iter().copied().filter(|k| attrs.has(k)).collect();
        if present.len() != 1 {
            return Err(Error::attribute(
                "Constant",
                "value",
                format!("exactly one value attribute is required, found {:?}", present),
            ));
        }

        let value = match present[0] {
            "value" => match attrs.tensor("value")? {
                Some(t) => Tensor::from_model_tensor(t)?,
                None => return Err(Error::attribute("Constant", "value", "missing tensor")),
            },
            "value_float" => Tensor::scalar(attrs.float_or("value_float", 0.0)?),
            "value_int" => Tensor::scalar(attrs.required_int("value_int")?),
            "value_ints" => {
                let values = attrs.ints("value_ints")?.unwrap_or_default();
                Tensor::from_shape_vec(&[values.len()], values)?
            }
            _ => match node.attributes.get("value_floats") {
                Some(crate::model::Attribute::Floats(values)) => {
                    Tensor::from_shape_vec(&[values.len()], values.clone())?
                }
                _ => {
                    return Err(Error::attribute("Constant", "value_floats", "expected FLOATS"))
                }
            },
        };
        Ok(Box::new(ConstantKernel { value }))
    }
}

impl Kernel for ConstantKernel {
    fn compute(&self, _inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        Ok(vec![self.value.clone()])
    }

    fn infer_shapes(&self, _inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(vec![Some(ValueShape::of(&self.value))])
    }
}

/// Transpose operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Transpose;

#[derive(Debug, Clone)]
pub struct TransposeKernel {
    perm: Option<Vec<usize>>,
}

impl Operator for Transpose {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        let perm = Attributes::new(node)
            .ints("perm")?
            .map(|p| {
                p.into_iter()
                    .map(|v| {
                        usize::try_from(v).map_err(|_| {
                            Error::attribute("Transpose", "perm", format!("negative axis {}", v))
                        })
                    })
                    .collect::<Result<Vec<usize>>>()
            })
            .transpose()?;
        Ok(Box::new(TransposeKernel { perm }))
    }
}

impl TransposeKernel {
    fn permutation(&self, rank: usize) -> Vec<usize> {
        match &self.perm {
            Some(p) => p.clone(),
            None => (0..rank).rev().collect(),
        }
    }
}

impl Kernel for TransposeKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "Transpose")?;
        Ok(vec![x.permute(&self.permutation(x.ndim()))?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        let x = match inputs.first() {
            Some(Some(x)) => x,
            _ => return Ok(vec![None]),
        };
        let dims = x.dims.as_ref().and_then(|dims| {
            self.permutation(dims.len())
                .iter()
                .map(|&i| dims.get(i).cloned())
                .collect::<Option<Vec<Dimension>>>()
        });
        Ok(vec![Some(ValueShape::new(x.data_type, dims))])
    }
}

/// Reshape operator (shape given as second input)
#[derive(Debug, Clone, Copy, Default)]
pub struct Reshape;

#[derive(Debug, Clone, Copy)]
pub struct ReshapeKernel {
    allow_zero: bool,
}

impl Operator for Reshape {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 2, 2, 1)?;
        let allow_zero = Attributes::new(node).flag("allowzero", false)?;
        Ok(Box::new(ReshapeKernel { allow_zero }))
    }
}

/// Resolve `0` (copy) and `-1` (infer) entries of a requested shape
pub fn resolve_reshape(input_shape: &[usize], requested: &[i64], allow_zero: bool) -> Result<Vec<usize>> {
    let overflow = || {
        Error::ValidationError(format!(
            "Reshape of {:?} into {:?} overflows the element count",
            input_shape, requested
        ))
    };
    let total = checked_product(input_shape).ok_or_else(overflow)?;
    let mut shape = Vec::with_capacity(requested.len());
    let mut inferred = None;
    for (i, &d) in requested.iter().enumerate() {
        match d {
            -1 if inferred.is_none() => {
                inferred = Some(i);
                shape.push(1);
            }
            0 if !allow_zero => shape.push(*input_shape.get(i).ok_or_else(|| {
                Error::ValidationError(format!(
                    "Reshape cannot copy dimension {} of shape {:?}",
                    i, input_shape
                ))
            })?),
            d if d >= 0 => shape.push(d as usize),
            _ => {
                return Err(Error::ValidationError(format!(
                    "invalid Reshape target {:?}",
                    requested
                )))
            }
        }
    }
    if let Some(i) = inferred {
        let known = checked_product(&shape).ok_or_else(overflow)?;
        if known == 0 || total % known != 0 {
            return Err(Error::ValidationError(format!(
                "cannot reshape {:?} into {:?}",
                input_shape, requested
            )));
        }
        shape[i] = total / known;
    }
    if checked_product(&shape).ok_or_else(overflow)? != total {
        return Err(Error::ValidationError(format!(
            "cannot reshape {:?} into {:?}",
            input_shape, requested
        )));
    }
    Ok(shape)
}

fn checked_product(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

impl Kernel for ReshapeKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "Reshape")?;
        let requested = inputs.require(1, "Reshape")?.as_i64_vec()?;
        let shape = resolve_reshape(x.shape(), &requested, self.allow_zero)?;
        Ok(vec![x.reshape(&shape)?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(vec![inputs
            .first()
            .cloned()
            .flatten()
            .map(|x| ValueShape::new(x.data_type, None))])
    }
}

/// Axes from an attribute (older opsets) or from an optional second input
fn axes_from(attr: &Option<Vec<i64>>, inputs: &OpInputs<'_>) -> Result<Option<Vec<i64>>> {
    match (attr, inputs.get(1)) {
        (Some(axes), _) => Ok(Some(axes.clone())),
        (None, Some(t)) => Ok(Some(t.as_i64_vec()?)),
        (None, None) => Ok(None),
    }
}

/// Squeeze operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Squeeze;

#[derive(Debug, Clone)]
pub struct SqueezeKernel {
    axes: Option<Vec<i64>>,
}

impl Operator for Squeeze {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 2, 1)?;
        let axes = Attributes::new(node).ints("axes")?;
        Ok(Box::new(SqueezeKernel { axes }))
    }
}

impl Kernel for SqueezeKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "Squeeze")?;
        let axes = axes_from(&self.axes, &inputs)?
            .unwrap_or_default()
            .into_iter()
            .map(|a| normalize_axis(a, x.ndim()))
            .collect::<Result<Vec<usize>>>()?;
        Ok(vec![x.squeeze_axes(&axes)?])
    }
}

/// Unsqueeze operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsqueeze;

#[derive(Debug, Clone)]
pub struct UnsqueezeKernel {
    axes: Option<Vec<i64>>,
}

impl Operator for Unsqueeze {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 2, 1)?;
        let axes = Attributes::new(node).ints("axes")?;
        if axes.is_none() && node.inputs.len() < 2 {
            return Err(Error::attribute(
                "Unsqueeze",
                "axes",
                "axes must be given as an attribute or as the second input",
            ));
        }
        Ok(Box::new(UnsqueezeKernel { axes }))
    }
}

impl Kernel for UnsqueezeKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "Unsqueeze")?;
        let axes = axes_from(&self.axes, &inputs)?.ok_or_else(|| {
            Error::ValidationError("Unsqueeze requires axes".to_string())
        })?;
        let rank = x.ndim() + axes.len();
        let axes = axes
            .into_iter()
            .map(|a| normalize_axis(a, rank))
            .collect::<Result<Vec<usize>>>()?;
        Ok(vec![x.insert_axes(&axes)?])
    }
}

/// Concat operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Concat;

#[derive(Debug, Clone, Copy)]
pub struct ConcatKernel {
    axis: i64,
}

impl Operator for Concat {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, usize::MAX, 1)?;
        let axis = Attributes::new(node).required_int("axis")?;
        Ok(Box::new(ConcatKernel { axis }))
    }
}

impl Kernel for ConcatKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let parts: Vec<&Tensor> = inputs.present().collect();
        let rank = parts.first().map(|t| t.ndim()).unwrap_or(0);
        let axis = normalize_axis(self.axis, rank)?;
        Ok(vec![Tensor::concat(&parts, axis)?])
    }
}

/// Cast operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Cast;

#[derive(Debug, Clone, Copy)]
pub struct CastKernel {
    to: DataType,
}

impl Operator for Cast {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        let code = Attributes::new(node).required_int("to")?;
        let to = i32::try_from(code)
            .map(DataType::from_proto)
            .unwrap_or(DataType::Undefined);
        if to == DataType::Undefined {
            return Err(Error::attribute("Cast", "to", format!("unknown element type {}", code)));
        }
        Ok(Box::new(CastKernel { to }))
    }
}

impl Kernel for CastKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "Cast")?;
        Ok(vec![x.cast(self.to)?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(vec![Some(ValueShape::new(
            self.to,
            inputs.first().cloned().flatten().and_then(|x| x.dims),
        ))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_reshape() {
        assert_eq!(resolve_reshape(&[2, 3, 4], &[0, -1], false).unwrap(), vec![2, 12]);
        assert_eq!(resolve_reshape(&[6], &[3, 2], false).unwrap(), vec![3, 2]);
        assert_eq!(resolve_reshape(&[0, 3], &[0, 3], true).unwrap(), vec![0, 3]);
        assert!(resolve_reshape(&[6], &[4, -1], false).is_err());
        assert!(resolve_reshape(&[6], &[-1, -1], false).is_err());
    }

    #[test]
    fn test_resolve_reshape_rejects_overflowing_targets() {
        let huge = 1i64 << 40;
        assert!(matches!(
            resolve_reshape(&[1], &[huge, huge], false),
            Err(Error::ValidationError(_))
        ));
        assert!(matches!(
            resolve_reshape(&[4], &[huge, huge, -1], false),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_transpose_default_reverses_axes() {
        let kernel = TransposeKernel { perm: None };
        assert_eq!(kernel.permutation(3), vec![2, 1, 0]);
    }
}
