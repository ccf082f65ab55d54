use std::cmp::Ordering;

use ndarray::{ArrayD, Axis, IxDyn};

use crate::error::{Error, Result};
use crate::model::{DataType, Node};
use crate::ops::attributes::{check_arity, Attributes};
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator, ValueShape};
use crate::ops::tensor::{normalize_axis, Numeric, Tensor};

/// TopK operator: the `k` largest (or smallest) entries along an axis
#[derive(Debug, Clone, Copy, Default)]
pub struct TopK;

#[derive(Debug, Clone, Copy)]
pub struct TopKKernel {
    axis: i64,
    largest: bool,
}

impl Operator for TopK {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 2, 2, 1)?;
        let attrs = Attributes::new(node);
        // Results are always returned sorted, which `sorted = 0` permits
        attrs.flag("sorted", true)?;
        Ok(Box::new(TopKKernel {
            axis: attrs.int_or("axis", -1)?,
            largest: attrs.flag("largest", true)?,
        }))
    }
}

/// Values and int64 indices of the top `k` entries of every lane along `axis`
///
/// Equal values keep their original order, so the lower index comes first.
pub fn topk_array<T: Copy + PartialOrd>(
    a: &ArrayD<T>,
    k: usize,
    axis: usize,
    largest: bool,
) -> Result<(ArrayD<T>, ArrayD<i64>)> {
    let rank = a.ndim();
    if axis >= rank {
        return Err(Error::ValidationError(format!(
            "TopK axis {} out of range for rank {}",
            axis, rank
        )));
    }
    let axis_len = a.shape()[axis];
    if k > axis_len {
        return Err(Error::ValidationError(format!(
            "TopK k={} exceeds axis length {}",
            k, axis_len
        )));
    }

    // Move `axis` last so every lane is contiguous in logical order
    let mut perm: Vec<usize> = (0..rank).filter(|&i| i != axis).collect();
    perm.push(axis);
    let moved = a.view().permuted_axes(perm.clone());

    let lanes = moved.len() / axis_len.max(1);
    let mut values = Vec::with_capacity(lanes * k);
    let mut indices = Vec::with_capacity(lanes * k);
    for lane in moved.lanes(Axis(rank - 1)) {
        let mut order: Vec<usize> = (0..lane.len()).collect();
        order.sort_by(|&i, &j| {
            let ord = lane[i].partial_cmp(&lane[j]).unwrap_or(Ordering::Equal);
            if largest {
                ord.reverse()
            } else {
                ord
            }
        });
        for &i in order.iter().take(k) {
            values.push(lane[i]);
            indices.push(i as i64);
        }
    }

    let mut moved_shape: Vec<usize> = perm.iter().map(|&p| a.shape()[p]).collect();
    moved_shape[rank - 1] = k;

    let mut inverse = vec![0; rank];
    for (i, &p) in perm.iter().enumerate() {
        inverse[p] = i;
    }

    let values = ArrayD::from_shape_vec(IxDyn(&moved_shape), values)?
        .permuted_axes(inverse.clone())
        .as_standard_layout()
        .into_owned();
    let indices = ArrayD::from_shape_vec(IxDyn(&moved_shape), indices)?
        .permuted_axes(inverse)
        .as_standard_layout()
        .into_owned();
    Ok((values, indices))
}

impl Kernel for TopKKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "TopK")?;
        let k = inputs.require(1, "TopK")?.as_i64_vec()?;
        let k = match k.as_slice() {
            [k] if *k >= 0 => *k as usize,
            _ => {
                return Err(Error::ValidationError(format!(
                    "TopK expects a single non-negative k, got {:?}",
                    k
                )))
            }
        };
        let axis = normalize_axis(self.axis, x.ndim())?;

        let (values, indices) = match x {
            Tensor::Float(a) => {
                let (v, i) = topk_array(a, k, axis, self.largest)?;
                (Tensor::Float(v), i)
            }
            Tensor::Double(a) => {
                let (v, i) = topk_array(a, k, axis, self.largest)?;
                (Tensor::Double(v), i)
            }
            Tensor::Int32(a) => {
                let (v, i) = topk_array(a, k, axis, self.largest)?;
                (Tensor::Int32(v), i)
            }
            Tensor::Int64(a) => {
                let (v, i) = topk_array(a, k, axis, self.largest)?;
                (Tensor::Int64(v), i)
            }
            other => {
                return Err(Error::ValidationError(format!(
                    "TopK expects a numeric tensor, got {}",
                    other.describe()
                )))
            }
        };
        Ok(vec![values, Tensor::Int64(indices)])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        let x = inputs.first().cloned().flatten();
        Ok(vec![
            x.map(|x| ValueShape::new(x.data_type, None)),
            Some(ValueShape::new(DataType::Int64, None)),
        ])
    }
}

/// CumSum operator
#[derive(Debug, Clone, Copy, Default)]
pub struct CumSum;

#[derive(Debug, Clone, Copy)]
pub struct CumSumKernel {
    exclusive: bool,
    reverse: bool,
}

impl Operator for CumSum {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 2, 2, 1)?;
        let attrs = Attributes::new(node);
        Ok(Box::new(CumSumKernel {
            exclusive: attrs.flag("exclusive", false)?,
            reverse: attrs.flag("reverse", false)?,
        }))
    }

    fn inplace_inputs(&self) -> &'static [usize] {
        &[0]
    }
}

/// Running sum along `axis`, overwriting `a`
pub fn cumsum_inplace<T: Numeric>(a: &mut ArrayD<T>, axis: usize, exclusive: bool, reverse: bool) {
    if reverse {
        a.invert_axis(Axis(axis));
    }
    for mut lane in a.lanes_mut(Axis(axis)) {
        let mut acc = T::zero();
        for v in lane.iter_mut() {
            let current = *v;
            *v = if exclusive { acc } else { acc.add(current) };
            acc = acc.add(current);
        }
    }
    if reverse {
        a.invert_axis(Axis(axis));
    }
}

impl Kernel for CumSumKernel {
    fn compute(&self, mut inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let axis = match inputs.require(1, "CumSum")?.as_i64_vec()?.as_slice() {
            [axis] => *axis,
            other => {
                return Err(Error::ValidationError(format!(
                    "CumSum axis must hold a single value, got {:?}",
                    other
                )))
            }
        };

        // Reuses the caller's buffer when it was handed over
        let mut x = inputs.take(0, "CumSum")?.into_owned();
        let axis = normalize_axis(axis, x.ndim())?;
        match &mut x {
            Tensor::Float(a) => cumsum_inplace(a, axis, self.exclusive, self.reverse),
            Tensor::Double(a) => cumsum_inplace(a, axis, self.exclusive, self.reverse),
            Tensor::Int32(a) => cumsum_inplace(a, axis, self.exclusive, self.reverse),
            Tensor::Int64(a) => cumsum_inplace(a, axis, self.exclusive, self.reverse),
            other => {
                return Err(Error::ValidationError(format!(
                    "CumSum expects a numeric tensor, got {}",
                    other.describe()
                )))
            }
        }
        Ok(vec![x])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(vec![inputs.first().cloned().flatten()])
    }
}
