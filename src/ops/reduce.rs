use ndarray::{ArrayD, Axis};

use crate::error::{Error, Result};
use crate::model::{Dimension, Node};
use crate::ops::attributes::{check_arity, Attributes};
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator, ValueShape};
use crate::ops::tensor::{normalize_axis, Numeric, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    SumSquare,
    Mean,
    Max,
}

/// ReduceSum, ReduceSumSquare, ReduceMean and ReduceMax
#[derive(Debug, Clone, Copy)]
pub struct Reduce(pub ReduceKind);

#[derive(Debug, Clone)]
pub struct ReduceKernel {
    kind: ReduceKind,
    axes: Option<Vec<i64>>,
    keepdims: bool,
    noop_with_empty_axes: bool,
}

impl Operator for Reduce {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 2, 1)?;
        let attrs = Attributes::new(node);
        Ok(Box::new(ReduceKernel {
            kind: self.0,
            axes: attrs.ints("axes")?,
            keepdims: attrs.flag("keepdims", true)?,
            noop_with_empty_axes: attrs.flag("noop_with_empty_axes", false)?,
        }))
    }
}

impl ReduceKernel {
    /// Sorted, de-duplicated axes to reduce; `None` means leave the input untouched
    fn resolve_axes(&self, rank: usize, axes_input: Option<&Tensor>) -> Result<Option<Vec<usize>>> {
        let requested = match (&self.axes, axes_input) {
            (Some(axes), _) => axes.clone(),
            (None, Some(t)) => t.as_i64_vec()?,
            (None, None) => Vec::new(),
        };
        if requested.is_empty() {
            return Ok(if self.noop_with_empty_axes {
                None
            } else {
                Some((0..rank).collect())
            });
        }
        let mut axes = requested
            .into_iter()
            .map(|a| normalize_axis(a, rank))
            .collect::<Result<Vec<usize>>>()?;
        axes.sort_unstable();
        axes.dedup();
        Ok(Some(axes))
    }
}

fn reduce_array<T: Numeric>(
    a: &ArrayD<T>,
    axes: &[usize],
    keepdims: bool,
    kind: ReduceKind,
) -> Result<ArrayD<T>> {
    let mut result = match kind {
        ReduceKind::SumSquare => a.mapv(|v| v.mul(v)),
        _ => a.clone(),
    };
    let count: usize = axes.iter().map(|&ax| a.shape()[ax]).product();

    for &ax in axes.iter().rev() {
        result = match kind {
            ReduceKind::Max => {
                if result.shape()[ax] == 0 {
                    return Err(Error::ValidationError(
                        "ReduceMax over an empty axis".to_string(),
                    ));
                }
                result.map_axis(Axis(ax), |lane| {
                    lane.iter()
                        .copied()
                        .reduce(|m, v| if v > m { v } else { m })
                        .unwrap_or_else(T::zero)
                })
            }
            _ => result.fold_axis(Axis(ax), T::zero(), |&acc, &v| acc.add(v)),
        };
    }

    if kind == ReduceKind::Mean {
        let divisor = T::from_usize(count);
        let mut failed = false;
        result.mapv_inplace(|v| match v.checked_div(divisor) {
            Some(q) => q,
            None => {
                failed = true;
                v
            }
        });
        if failed {
            return Err(Error::ValidationError("ReduceMean over an empty axis".to_string()));
        }
    }

    if keepdims {
        for &ax in axes {
            result = result.insert_axis(Axis(ax));
        }
    }
    Ok(result)
}

impl Kernel for ReduceKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "Reduce")?;
        let axes = match self.resolve_axes(x.ndim(), inputs.get(1))? {
            Some(axes) => axes,
            None => return Ok(vec![x.clone()]),
        };
        let result = match x {
            Tensor::Float(a) => Tensor::Float(reduce_array(a, &axes, self.keepdims, self.kind)?),
            Tensor::Double(a) => Tensor::Double(reduce_array(a, &axes, self.keepdims, self.kind)?),
            Tensor::Int32(a) => Tensor::Int32(reduce_array(a, &axes, self.keepdims, self.kind)?),
            Tensor::Int64(a) => Tensor::Int64(reduce_array(a, &axes, self.keepdims, self.kind)?),
            other => {
                return Err(Error::ValidationError(format!(
                    "{:?} reduction expects a numeric tensor, got {}",
                    self.kind,
                    other.describe()
                )))
            }
        };
        Ok(vec![result])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        let x = match inputs.first() {
            Some(Some(x)) => x,
            _ => return Ok(vec![None]),
        };
        // Axes given as an input are only known at run time
        let dims = match (&x.dims, &self.axes) {
            (Some(dims), Some(_)) => self.resolve_axes(dims.len(), None)?.map(|axes| {
                dims.iter()
                    .enumerate()
                    .filter_map(|(i, d)| match (axes.contains(&i), self.keepdims) {
                        (false, _) => Some(d.clone()),
                        (true, true) => Some(Dimension::Value(1)),
                        (true, false) => None,
                    })
                    .collect()
            }),
            _ => None,
        };
        Ok(vec![Some(ValueShape::new(x.data_type, dims))])
    }
}
