use ndarray::{ArrayD, ArrayView2, Ix2, IxDyn, LinalgScalar};
use num_traits::Float;

use crate::error::{Error, Result};
use crate::model::{Dimension, Node};
use crate::ops::attributes::{check_arity, Attributes};
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator, ValueShape};
use crate::ops::tensor::Tensor;

/// GEMM (General Matrix Multiplication) operator
/// Y = alpha * (A @ B) + beta * C
/// A can be optionally transposed (transA)
/// B can be optionally transposed (transB)
#[derive(Debug, Clone, Copy, Default)]
pub struct Gemm;

/// Validated Gemm attributes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmKernel {
    pub alpha: f32,
    pub beta: f32,
    pub transpose_a: bool,
    pub transpose_b: bool,
}

impl Default for GemmKernel {
    fn default() -> Self {
        // ONNX operator defaults
        Self {
            alpha: 1.0,
            beta: 1.0,
            transpose_a: false,
            transpose_b: false,
        }
    }
}

impl Operator for Gemm {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 2, 3, 1)?;
        let attrs = Attributes::new(node);
        Ok(Box::new(GemmKernel {
            alpha: attrs.float_or("alpha", 1.0)?,
            beta: attrs.float_or("beta", 1.0)?,
            transpose_a: attrs.flag("transA", false)?,
            transpose_b: attrs.flag("transB", false)?,
        }))
    }
}

impl Kernel for GemmKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let a = inputs.require(0, "Gemm")?;
        let b = inputs.require(1, "Gemm")?;
        let c = inputs.get(2);
        Ok(vec![compute_gemm(a, b, c, self)?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        let (a, b) = match (inputs.first(), inputs.get(1)) {
            (Some(Some(a)), Some(Some(b))) => (a, b),
            _ => return Ok(vec![None]),
        };
        let dims = match (&a.dims, &b.dims) {
            (Some(da), Some(db)) => gemm_dims(da, db, self),
            _ => None,
        };
        Ok(vec![Some(ValueShape::new(a.data_type, dims))])
    }
}

/// Compute the GEMM operation
pub fn compute_gemm(a: &Tensor, b: &Tensor, c: Option<&Tensor>, params: &GemmKernel) -> Result<Tensor> {
    match (a, b) {
        (Tensor::Float(x), Tensor::Float(y)) => {
            let c = c.map(|t| t.as_array::<f32>()).transpose()?;
            Ok(Tensor::Float(gemm_array(x, y, c, params.alpha, params.beta, params)?))
        }
        (Tensor::Double(x), Tensor::Double(y)) => {
            let c = c.map(|t| t.as_array::<f64>()).transpose()?;
            let (alpha, beta) = (params.alpha as f64, params.beta as f64);
            Ok(Tensor::Double(gemm_array(x, y, c, alpha, beta, params)?))
        }
        _ => Err(Error::ValidationError(format!(
            "Gemm expects two floating point tensors of the same type, got {} and {}",
            a.describe(),
            b.describe()
        ))),
    }
}

fn gemm_array<T: Float + LinalgScalar>(
    a: &ArrayD<T>,
    b: &ArrayD<T>,
    c: Option<&ArrayD<T>>,
    alpha: T,
    beta: T,
    params: &GemmKernel,
) -> Result<ArrayD<T>> {
    if a.ndim() != 2 || b.ndim() != 2 {
        return Err(Error::ValidationError(format!(
            "Gemm inputs must be 2D matrices, got shapes {:?} and {:?}",
            a.shape(),
            b.shape()
        )));
    }

    let a: ArrayView2<'_, T> = a.view().into_dimensionality::<Ix2>()?;
    let b: ArrayView2<'_, T> = b.view().into_dimensionality::<Ix2>()?;
    let a = if params.transpose_a { a.reversed_axes() } else { a };
    let b = if params.transpose_b { b.reversed_axes() } else { b };

    let (m, k1) = a.dim();
    let (k2, n) = b.dim();
    if k1 != k2 {
        return Err(Error::ValidationError(format!(
            "Incompatible dimensions for Gemm: {} and {}",
            k1, k2
        )));
    }

    let product = a.dot(&b).mapv(|v| v * alpha).into_dyn();
    match c {
        None => Ok(product),
        Some(c) => {
            // C is unidirectionally broadcast to [M, N]
            let c_view = c.broadcast(IxDyn(&[m, n])).ok_or_else(|| {
                Error::ValidationError(format!(
                    "Incompatible C matrix shape for Gemm: cannot broadcast {:?} to [{}, {}]",
                    c.shape(),
                    m,
                    n
                ))
            })?;
            Ok(&product + &c_view.mapv(|v| v * beta))
        }
    }
}

/// Declared output dims for `[M, K] x [K, N]`
pub fn gemm_dims(a: &[Dimension], b: &[Dimension], params: &GemmKernel) -> Option<Vec<Dimension>> {
    if a.len() != 2 || b.len() != 2 {
        return None;
    }
    let m = if params.transpose_a { &a[1] } else { &a[0] };
    let n = if params.transpose_b { &b[0] } else { &b[1] };
    Some(vec![m.clone(), n.clone()])
}
