use ndarray::ArrayD;
use num_traits::Float;

use crate::error::{Error, Result};
use crate::model::{Dimension, Node};
use crate::ops::attributes::check_arity;
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator, ValueShape};
use crate::ops::tensor::{binary_arithmetic, where_select, BinaryOp, Numeric, Tensor};

/// Add, Sub, Mul and Div with numpy-style broadcasting
#[derive(Debug, Clone, Copy)]
pub struct Binary(pub BinaryOp);

impl Operator for Binary {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 2, 2, 1)?;
        Ok(Box::new(*self))
    }
}

impl Kernel for Binary {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let a = inputs.require(0, "Binary")?;
        let b = inputs.require(1, "Binary")?;
        Ok(vec![binary_arithmetic(self.0, a, b)?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        match (inputs.first(), inputs.get(1)) {
            (Some(Some(a)), Some(Some(b))) => {
                let dims = match (&a.dims, &b.dims) {
                    (Some(da), Some(db)) => broadcast_dims(da, db),
                    _ => None,
                };
                Ok(vec![Some(ValueShape::new(a.data_type, dims))])
            }
            _ => Ok(vec![None]),
        }
    }
}

/// Broadcast two declared shapes; unknown when a dimension pair cannot be decided
pub fn broadcast_dims(a: &[Dimension], b: &[Dimension]) -> Option<Vec<Dimension>> {
    let rank = a.len().max(b.len());
    let pad = |dims: &[Dimension], i: usize| {
        if i < rank - dims.len() {
            Dimension::Value(1)
        } else {
            dims[i - (rank - dims.len())].clone()
        }
    };
    (0..rank)
        .map(|i| match (pad(a, i), pad(b, i)) {
            (x, y) if x == y => Some(x),
            (Dimension::Value(1), y) => Some(y),
            (x, Dimension::Value(1)) => Some(x),
            _ => None,
        })
        .collect()
}

/// Single-input element-wise functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    Neg,
    Abs,
    Sqrt,
    Exp,
}

#[derive(Debug, Clone, Copy)]
pub struct Unary(pub UnaryKind);

impl Operator for Unary {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        Ok(Box::new(*self))
    }
}

fn unary_float<T: Float>(kind: UnaryKind, a: &ArrayD<T>) -> ArrayD<T> {
    match kind {
        UnaryKind::Neg => a.mapv(|v| -v),
        UnaryKind::Abs => a.mapv(|v| v.abs()),
        UnaryKind::Sqrt => a.mapv(|v| v.sqrt()),
        UnaryKind::Exp => a.mapv(|v| v.exp()),
    }
}

fn unary_int<T: Numeric>(kind: UnaryKind, a: &ArrayD<T>) -> Result<ArrayD<T>> {
    match kind {
        UnaryKind::Neg => Ok(a.mapv(|v| v.neg())),
        UnaryKind::Abs => Ok(a.mapv(|v| v.abs())),
        other => Err(Error::ValidationError(format!(
            "{:?} is only defined for floating point tensors",
            other
        ))),
    }
}

impl Kernel for Unary {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "Unary")?;
        let result = match x {
            Tensor::Float(a) => Tensor::Float(unary_float(self.0, a)),
            Tensor::Double(a) => Tensor::Double(unary_float(self.0, a)),
            Tensor::Int32(a) => Tensor::Int32(unary_int(self.0, a)?),
            Tensor::Int64(a) => Tensor::Int64(unary_int(self.0, a)?),
            other => {
                return Err(Error::ValidationError(format!(
                    "{:?} expects a numeric tensor, got {}",
                    self.0,
                    other.describe()
                )))
            }
        };
        Ok(vec![result])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(vec![inputs.first().cloned().flatten()])
    }
}

/// Where(condition, x, y)
#[derive(Debug, Clone, Copy)]
pub struct Where;

impl Operator for Where {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 3, 3, 1)?;
        Ok(Box::new(*self))
    }
}

impl Kernel for Where {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let condition = inputs.require(0, "Where")?;
        let x = inputs.require(1, "Where")?;
        let y = inputs.require(2, "Where")?;
        Ok(vec![where_select(condition, x, y)?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(vec![inputs
            .get(1)
            .cloned()
            .flatten()
            .map(|x| ValueShape::new(x.data_type, None))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_dims_keeps_symbols() {
        let a = vec![Dimension::Param("N".into()), Dimension::Value(2)];
        let b = vec![Dimension::Value(1)];
        assert_eq!(broadcast_dims(&a, &b), Some(a.clone()));
        let c = vec![Dimension::Value(3)];
        assert_eq!(broadcast_dims(&a, &c), None);
    }

    #[test]
    fn test_unary_int_rejects_sqrt() {
        let a = ArrayD::from_elem(ndarray::IxDyn(&[2]), 4i64);
        assert!(unary_int(UnaryKind::Sqrt, &a).is_err());
        assert_eq!(
            unary_int(UnaryKind::Neg, &a).unwrap().iter().copied().collect::<Vec<_>>(),
            vec![-4, -4]
        );
    }
}
