pub mod activations;
pub mod attributes;
pub mod control_flow;
pub mod elementwise;
pub mod reduce;
pub mod registry;
pub mod selection;
pub mod shape;
pub mod tensor;

pub mod prelude {
    pub use super::registry::{
        BuildContext, ComputeContext, Kernel, OpInputs, Operator, OperatorRegistry, ValueShape,
    };
    pub use super::tensor::{Shape, Tensor};
}

pub use registry::{Kernel, Operator, OperatorRegistry, ValueShape};
pub use tensor::{Shape, Tensor};

// Module files for math subdirectory
pub mod math {
    pub mod gemm;
    pub mod matmul;
}
