use crate::error::{Error, Result};
use crate::model::Node;
use crate::ops::attributes::{check_arity, Attributes};
use crate::ops::registry::{BuildContext, ComputeContext, Kernel, OpInputs, Operator, ValueShape};
use crate::ops::tensor::Tensor;

/// Base struct for simple activation operators
#[derive(Debug, Clone, Copy)]
pub struct ActivationBase {
    f32_fn: fn(f32) -> f32,
    f64_fn: fn(f64) -> f64,
    name: &'static str,
}

impl ActivationBase {
    const fn new(f32_fn: fn(f32) -> f32, f64_fn: fn(f64) -> f64, name: &'static str) -> Self {
        Self { f32_fn, f64_fn, name }
    }

    fn apply(&self, x: &Tensor) -> Result<Tensor> {
        match x {
            Tensor::Float(a) => Ok(Tensor::Float(a.mapv(self.f32_fn))),
            Tensor::Double(a) => Ok(Tensor::Double(a.mapv(self.f64_fn))),
            other => Err(Error::ValidationError(format!(
                "{} expects a floating point tensor, got {}",
                self.name,
                other.describe()
            ))),
        }
    }
}

impl Kernel for ActivationBase {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, self.name)?;
        Ok(vec![self.apply(x)?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        // Activation functions preserve input shape
        Ok(vec![inputs.first().cloned().flatten()])
    }
}

const RELU: ActivationBase = ActivationBase::new(
    |x| if x > 0.0 { x } else { 0.0 },
    |x| if x > 0.0 { x } else { 0.0 },
    "Relu",
);

const SIGMOID: ActivationBase = ActivationBase::new(
    |x| 1.0 / (1.0 + (-x).exp()),
    |x| 1.0 / (1.0 + (-x).exp()),
    "Sigmoid",
);

const TANH: ActivationBase = ActivationBase::new(f32::tanh, f64::tanh, "Tanh");

/// ReLU activation operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

/// LeakyReLU activation operator
#[derive(Debug, Clone, Copy, Default)]
pub struct LeakyRelu;

/// Sigmoid activation operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Sigmoid;

/// Tanh activation operator
#[derive(Debug, Clone, Copy, Default)]
pub struct Tanh;

// Implement the Operator trait for ReLU
impl Operator for Relu {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        Ok(Box::new(RELU))
    }
}

// Implement the Operator trait for Sigmoid
impl Operator for Sigmoid {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        Ok(Box::new(SIGMOID))
    }
}

// Implement the Operator trait for Tanh
impl Operator for Tanh {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        Ok(Box::new(TANH))
    }
}

/// LeakyRelu bound to its `alpha`
#[derive(Debug, Clone, Copy)]
pub struct LeakyReluKernel {
    alpha: f32,
}

// Implement the Operator trait for LeakyRelu
impl Operator for LeakyRelu {
    fn build(&self, node: &Node, _cx: &mut BuildContext<'_>) -> Result<Box<dyn Kernel>> {
        check_arity(node, 1, 1, 1)?;
        // Default alpha is 0.01
        let alpha = Attributes::new(node).float_or("alpha", 0.01)?;
        Ok(Box::new(LeakyReluKernel { alpha }))
    }
}

impl Kernel for LeakyReluKernel {
    fn compute(&self, inputs: OpInputs<'_>, _ctx: &ComputeContext<'_>) -> Result<Vec<Tensor>> {
        let x = inputs.require(0, "LeakyRelu")?;
        Ok(vec![leaky_relu(x, self.alpha)?])
    }

    fn infer_shapes(&self, inputs: &[Option<ValueShape>]) -> Result<Vec<Option<ValueShape>>> {
        Ok(vec![inputs.first().cloned().flatten()])
    }
}

/// ReLU activation function
pub fn relu(x: &Tensor) -> Result<Tensor> {
    RELU.apply(x)
}

/// LeakyReLU activation function
pub fn leaky_relu(x: &Tensor, alpha: f32) -> Result<Tensor> {
    match x {
        Tensor::Float(a) => Ok(Tensor::Float(a.mapv(|v| if v > 0.0 { v } else { alpha * v }))),
        Tensor::Double(a) => {
            let alpha = alpha as f64;
            Ok(Tensor::Double(a.mapv(|v| if v > 0.0 { v } else { alpha * v })))
        }
        other => Err(Error::ValidationError(format!(
            "LeakyRelu expects a floating point tensor, got {}",
            other.describe()
        ))),
    }
}

/// Sigmoid activation function
pub fn sigmoid(x: &Tensor) -> Result<Tensor> {
    SIGMOID.apply(x)
}

/// Tanh activation function
pub fn tanh(x: &Tensor) -> Result<Tensor> {
    TANH.apply(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(t: &Tensor) -> Vec<f32> {
        t.as_array::<f32>().unwrap().iter().copied().collect()
    }

    #[test]
    fn test_relu() {
        let x = Tensor::from_shape_vec(&[4], vec![-1.0f32, 0.0, 0.5, 3.0]).unwrap();
        assert_eq!(values(&relu(&x).unwrap()), vec![0.0, 0.0, 0.5, 3.0]);
    }

    #[test]
    fn test_leaky_relu_alpha() {
        let x = Tensor::from_shape_vec(&[2], vec![-2.0f32, 2.0]).unwrap();
        assert_eq!(values(&leaky_relu(&x, 0.5).unwrap()), vec![-1.0, 2.0]);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let x = Tensor::from_shape_vec(&[1], vec![0.0f64]).unwrap();
        let y = sigmoid(&x).unwrap();
        assert_eq!(y.as_array::<f64>().unwrap().iter().next(), Some(&0.5));
    }

    #[test]
    fn test_integer_input_is_rejected() {
        let x = Tensor::from_shape_vec(&[1], vec![1i64]).unwrap();
        assert!(tanh(&x).is_err());
    }
}
