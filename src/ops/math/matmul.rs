use std::cmp::max;

use ndarray::{ArrayD, Axis, Ix2, IxDyn, LinalgScalar};

use crate::error::{Error, Result};
use crate::model::{Dimension, Node};
use crate::ops::attributes::check_arity;
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator, ValueShape};
use crate::ops::tensor::Tensor;

/// Matrix multiplication operator (numpy `matmul` semantics)
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMul;

impl Operator for MatMul {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 2, 2, 1)?;
        Ok(Box::new(*self))
    }
}

impl Kernel for MatMul {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let a = inputs.require(0, "MatMul")?;
        let b = inputs.require(1, "MatMul")?;
        Ok(vec![matmul(a, b)?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        let (a, b) = match (inputs.first(), inputs.get(1)) {
            (Some(Some(a)), Some(Some(b))) => (a, b),
            _ => return Ok(vec![None]),
        };
        let dims = match (&a.dims, &b.dims) {
            (Some(da), Some(db)) => matmul_dims(da, db),
            _ => None,
        };
        Ok(vec![Some(ValueShape::new(a.data_type, dims))])
    }
}

/// Multiply two tensors of the same numeric type
pub fn matmul(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    match (a, b) {
        (Tensor::Float(x), Tensor::Float(y)) => Ok(Tensor::Float(matmul_array(x, y)?)),
        (Tensor::Double(x), Tensor::Double(y)) => Ok(Tensor::Double(matmul_array(x, y)?)),
        (Tensor::Int32(x), Tensor::Int32(y)) => Ok(Tensor::Int32(matmul_array(x, y)?)),
        (Tensor::Int64(x), Tensor::Int64(y)) => Ok(Tensor::Int64(matmul_array(x, y)?)),
        _ => Err(Error::ValidationError(format!(
            "MatMul expects two numeric tensors of the same type, got {} and {}",
            a.describe(),
            b.describe()
        ))),
    }
}

fn matmul_array<T: LinalgScalar>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>> {
    let output_shape = validate_matmul_shapes(a.shape(), b.shape())?;

    // Vectors are promoted to a row (left) or a column (right)
    let a2 = if a.ndim() == 1 { a.view().insert_axis(Axis(0)) } else { a.view() };
    let b2 = if b.ndim() == 1 { b.view().insert_axis(Axis(1)) } else { b.view() };

    // Handle 2D case (simple matrix multiplication)
    if a2.ndim() == 2 && b2.ndim() == 2 {
        let result = a2
            .into_dimensionality::<Ix2>()?
            .dot(&b2.into_dimensionality::<Ix2>()?);
        return Ok(result.into_shape(IxDyn(&output_shape))?);
    }

    let (a_rank, b_rank) = (a2.ndim(), b2.ndim());
    let batch_dims_a = &a2.shape()[..a_rank - 2];
    let batch_dims_b = &b2.shape()[..b_rank - 2];
    if batch_dims_a != batch_dims_b {
        return Err(Error::UnsupportedFeature(
            "Broadcasting batch dimensions in MatMul is not implemented".to_string(),
        ));
    }

    let batch_size: usize = batch_dims_a.iter().product();
    let (m, k) = (a2.shape()[a_rank - 2], a2.shape()[a_rank - 1]);
    let n = b2.shape()[b_rank - 1];

    let a3 = a2.as_standard_layout().into_owned().into_shape((batch_size, m, k))?;
    let b3 = b2.as_standard_layout().into_owned().into_shape((batch_size, k, n))?;

    let mut data = Vec::with_capacity(batch_size * m * n);
    for i in 0..batch_size {
        let c = a3.index_axis(Axis(0), i).dot(&b3.index_axis(Axis(0), i));
        data.extend(c.iter().copied());
    }
    Ok(ArrayD::from_shape_vec(IxDyn(&output_shape), data)?)
}

/// Validate shapes for matrix multiplication and return the output shape
pub fn validate_matmul_shapes(a_shape: &[usize], b_shape: &[usize]) -> Result<Vec<usize>> {
    if a_shape.is_empty() || b_shape.is_empty() {
        return Err(Error::ValidationError(
            "MatMul inputs cannot be scalars".to_string(),
        ));
    }

    let a_rank = a_shape.len();
    let b_rank = b_shape.len();

    // Vector dot product: [M] x [M] -> scalar
    if a_rank == 1 && b_rank == 1 {
        if a_shape[0] != b_shape[0] {
            return Err(Error::ValidationError(format!(
                "Incompatible vector dimensions for MatMul: {} and {}",
                a_shape[0], b_shape[0]
            )));
        }
        return Ok(vec![]);
    }

    // Vector * matrix: [M] x [M, N] -> [N]
    if a_rank == 1 {
        if a_shape[0] != b_shape[b_rank - 2] {
            return Err(Error::ValidationError(format!(
                "Incompatible dimensions for vector*matrix MatMul: {} and [{}, {}]",
                a_shape[0],
                b_shape[b_rank - 2],
                b_shape[b_rank - 1]
            )));
        }
        let mut output_shape = b_shape[..b_rank - 2].to_vec();
        output_shape.push(b_shape[b_rank - 1]);
        return Ok(output_shape);
    }

    // Matrix * vector: [M, N] x [N] -> [M]
    if b_rank == 1 {
        if a_shape[a_rank - 1] != b_shape[0] {
            return Err(Error::ValidationError(format!(
                "Incompatible dimensions for matrix*vector MatMul: [{}, {}] and {}",
                a_shape[a_rank - 2],
                a_shape[a_rank - 1],
                b_shape[0]
            )));
        }
        let mut output_shape = a_shape[..a_rank - 2].to_vec();
        output_shape.push(a_shape[a_rank - 2]);
        return Ok(output_shape);
    }

    if a_shape[a_rank - 1] != b_shape[b_rank - 2] {
        return Err(Error::ValidationError(format!(
            "Incompatible matrix dimensions for MatMul: {}x{} and {}x{}",
            a_shape[a_rank - 2],
            a_shape[a_rank - 1],
            b_shape[b_rank - 2],
            b_shape[b_rank - 1]
        )));
    }

    let mut output_shape = broadcast_batch_dims(&a_shape[..a_rank - 2], &b_shape[..b_rank - 2])?;
    output_shape.push(a_shape[a_rank - 2]);
    output_shape.push(b_shape[b_rank - 1]);
    Ok(output_shape)
}

/// Helper function to broadcast batch dimensions
fn broadcast_batch_dims(a_batch: &[usize], b_batch: &[usize]) -> Result<Vec<usize>> {
    // Pad shorter batch with ones
    let max_batch_dims = max(a_batch.len(), b_batch.len());
    let mut padded_a = vec![1; max_batch_dims];
    let mut padded_b = vec![1; max_batch_dims];

    for (i, &dim) in a_batch.iter().rev().enumerate() {
        padded_a[max_batch_dims - 1 - i] = dim;
    }
    for (i, &dim) in b_batch.iter().rev().enumerate() {
        padded_b[max_batch_dims - 1 - i] = dim;
    }

    padded_a
        .iter()
        .zip(&padded_b)
        .map(|(&dim_a, &dim_b)| match (dim_a, dim_b) {
            (1, d) | (d, 1) => Ok(d),
            (x, y) if x == y => Ok(x),
            _ => Err(Error::ValidationError(format!(
                "Cannot broadcast batch dimensions {} and {}",
                dim_a, dim_b
            ))),
        })
        .collect()
}

/// Output dims of a 2-D product when both operands have declared shapes
pub fn matmul_dims(a: &[Dimension], b: &[Dimension]) -> Option<Vec<Dimension>> {
    if a.len() == 2 && b.len() == 2 {
        Some(vec![a[0].clone(), b[1].clone()])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_2d() {
        let a = Tensor::from_shape_vec(&[2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Tensor::from_shape_vec(&[3, 2], vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(
            c,
            Tensor::from_shape_vec(&[2, 2], vec![58.0f32, 64.0, 139.0, 154.0]).unwrap()
        );
    }

    #[test]
    fn test_matmul_vectors() {
        let a = Tensor::from_shape_vec(&[3], vec![1i64, 2, 3]).unwrap();
        let b = Tensor::from_shape_vec(&[3], vec![4i64, 5, 6]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.shape(), &[] as &[usize]);
        assert_eq!(c.as_i64_vec().unwrap(), vec![32]);
    }

    #[test]
    fn test_matmul_batched() {
        let a = Tensor::from_shape_vec(&[2, 1, 2], vec![1.0f64, 2.0, 3.0, 4.0]).unwrap();
        let b = Tensor::from_shape_vec(&[2, 2, 1], vec![1.0f64, 1.0, 2.0, 2.0]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c, Tensor::from_shape_vec(&[2, 1, 1], vec![3.0f64, 14.0]).unwrap());
    }

    #[test]
    fn test_incompatible_shapes() {
        assert!(validate_matmul_shapes(&[2, 3], &[2, 3]).is_err());
        assert_eq!(validate_matmul_shapes(&[4, 2, 3], &[3, 5]).unwrap(), vec![4, 2, 5]);
    }
}
