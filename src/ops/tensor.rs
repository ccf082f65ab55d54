use std::fmt::{self, Debug, Display};

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Zip};
use num_traits::AsPrimitive;

use crate::error::{Error, Result};
use crate::model::{self, DataType};

/// Shape of a tensor
pub type Shape = Vec<usize>;

/// Runtime tensor
///
/// Each variant owns an `ndarray` buffer of the matching element type, so
/// integer and boolean values round-trip without any conversion.
#[derive(Clone, PartialEq)]
pub enum Tensor {
    Float(ArrayD<f32>),
    Double(ArrayD<f64>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Bool(ArrayD<bool>),
    String(ArrayD<String>),
}

/// Applies `$body` to the array inside any tensor variant
macro_rules! dispatch {
    ($tensor:expr, $arr:ident => $body:expr) => {
        match $tensor {
            Tensor::Float($arr) => $body,
            Tensor::Double($arr) => $body,
            Tensor::Int32($arr) => $body,
            Tensor::Int64($arr) => $body,
            Tensor::Bool($arr) => $body,
            Tensor::String($arr) => $body,
        }
    };
}

/// Like `dispatch!` but rewraps the result in the same variant
macro_rules! map_tensor {
    ($tensor:expr, $arr:ident => $body:expr) => {
        match $tensor {
            Tensor::Float($arr) => Tensor::Float($body),
            Tensor::Double($arr) => Tensor::Double($body),
            Tensor::Int32($arr) => Tensor::Int32($body),
            Tensor::Int64($arr) => Tensor::Int64($body),
            Tensor::Bool($arr) => Tensor::Bool($body),
            Tensor::String($arr) => Tensor::String($body),
        }
    };
}

pub(crate) use dispatch;
pub(crate) use map_tensor;

impl Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, a => write!(f, "Tensor::{}({:?})", self.data_type(), a))
    }
}

/// Element types a `Tensor` can hold
pub trait TensorElement: Clone + Send + Sync + 'static {
    const DATA_TYPE: DataType;
    fn into_tensor(array: ArrayD<Self>) -> Tensor;
    fn array(tensor: &Tensor) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_tensor_element {
    ($t:ty, $variant:ident, $dtype:expr) => {
        impl TensorElement for $t {
            const DATA_TYPE: DataType = $dtype;

            fn into_tensor(array: ArrayD<Self>) -> Tensor {
                Tensor::$variant(array)
            }

            fn array(tensor: &Tensor) -> Option<&ArrayD<Self>> {
                match tensor {
                    Tensor::$variant(a) => Some(a),
                    _ => None,
                }
            }
        }

        impl From<ArrayD<$t>> for Tensor {
            fn from(array: ArrayD<$t>) -> Self {
                Tensor::$variant(array)
            }
        }
    };
}

impl_tensor_element!(f32, Float, DataType::Float);
impl_tensor_element!(f64, Double, DataType::Double);
impl_tensor_element!(i32, Int32, DataType::Int32);
impl_tensor_element!(i64, Int64, DataType::Int64);
impl_tensor_element!(bool, Bool, DataType::Bool);
impl_tensor_element!(String, String, DataType::String);

/// Arithmetic shared by the numeric element types
///
/// Integer operations wrap on overflow; integer division by zero is reported
/// through `checked_div` instead of panicking.
pub trait Numeric: Copy + PartialOrd + Debug + Display + Send + Sync + 'static {
    fn zero() -> Self;
    fn from_usize(n: usize) -> Self;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn checked_div(self, rhs: Self) -> Option<Self>;
    fn abs(self) -> Self;
    fn neg(self) -> Self;
}

macro_rules! impl_numeric_float {
    ($t:ty) => {
        impl Numeric for $t {
            fn zero() -> Self {
                0.0
            }
            fn from_usize(n: usize) -> Self {
                n as $t
            }
            fn add(self, rhs: Self) -> Self {
                self + rhs
            }
            fn sub(self, rhs: Self) -> Self {
                self - rhs
            }
            fn mul(self, rhs: Self) -> Self {
                self * rhs
            }
            fn checked_div(self, rhs: Self) -> Option<Self> {
                Some(self / rhs)
            }
            fn abs(self) -> Self {
                <$t>::abs(self)
            }
            fn neg(self) -> Self {
                -self
            }
        }
    };
}

macro_rules! impl_numeric_int {
    ($t:ty) => {
        impl Numeric for $t {
            fn zero() -> Self {
                0
            }
            fn from_usize(n: usize) -> Self {
                n as $t
            }
            fn add(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }
            fn sub(self, rhs: Self) -> Self {
                self.wrapping_sub(rhs)
            }
            fn mul(self, rhs: Self) -> Self {
                self.wrapping_mul(rhs)
            }
            fn checked_div(self, rhs: Self) -> Option<Self> {
                if rhs == 0 {
                    None
                } else {
                    Some(self.wrapping_div(rhs))
                }
            }
            fn abs(self) -> Self {
                self.wrapping_abs()
            }
            fn neg(self) -> Self {
                self.wrapping_neg()
            }
        }
    };
}

impl_numeric_float!(f32);
impl_numeric_float!(f64);
impl_numeric_int!(i32);
impl_numeric_int!(i64);

/// Element-wise binary arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply<T: Numeric>(self, a: T, b: T) -> Option<T> {
        match self {
            BinaryOp::Add => Some(a.add(b)),
            BinaryOp::Sub => Some(a.sub(b)),
            BinaryOp::Mul => Some(a.mul(b)),
            BinaryOp::Div => a.checked_div(b),
        }
    }
}

impl Tensor {
    /// Create a tensor from a shape and row-major data
    pub fn from_shape_vec<T: TensorElement>(shape: &[usize], data: Vec<T>) -> Result<Self> {
        Ok(T::into_tensor(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    /// Create a rank-0 tensor
    pub fn scalar<T: TensorElement>(value: T) -> Self {
        T::into_tensor(ArrayD::from_elem(IxDyn(&[]), value))
    }

    /// Borrow the underlying array when the element type matches
    pub fn as_array<T: TensorElement>(&self) -> Result<&ArrayD<T>> {
        T::array(self).ok_or_else(|| {
            Error::ValidationError(format!(
                "expected a {} tensor, got {}",
                T::DATA_TYPE,
                self.describe()
            ))
        })
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Tensor::Float(_) => DataType::Float,
            Tensor::Double(_) => DataType::Double,
            Tensor::Int32(_) => DataType::Int32,
            Tensor::Int64(_) => DataType::Int64,
            Tensor::Bool(_) => DataType::Bool,
            Tensor::String(_) => DataType::String,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type/shape description such as `float[3, 2]`
    pub fn describe(&self) -> String {
        let dims: Vec<String> = self.shape().iter().map(|d| d.to_string()).collect();
        format!("{}[{}]", self.data_type(), dims.join(", "))
    }

    /// Decode a graph constant into a runtime tensor
    pub fn from_model_tensor(tensor: &model::Tensor) -> Result<Self> {
        let shape = tensor
            .dims
            .iter()
            .map(|&d| {
                usize::try_from(d).map_err(|_| {
                    Error::InvalidModel(format!(
                        "Tensor '{}' has negative dimension {}",
                        tensor.name, d
                    ))
                })
            })
            .collect::<Result<Vec<usize>>>()?;

        if !tensor.has_complete_value() {
            return Err(Error::StructuralError(format!(
                "Tensor '{}' has no valid value for dims {:?}",
                tensor.name, tensor.dims
            )));
        }

        let bytes = &tensor.data;
        match tensor.data_type {
            DataType::Float => Self::from_shape_vec(
                &shape,
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::Double => Self::from_shape_vec(
                &shape,
                bytes
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            DataType::Int32 => Self::from_shape_vec(
                &shape,
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            DataType::Int64 => Self::from_shape_vec(
                &shape,
                bytes
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            DataType::Bool => {
                Self::from_shape_vec(&shape, bytes.iter().map(|&b| b != 0).collect())
            }
            DataType::String => Self::from_shape_vec(&shape, tensor.strings.clone()),
            other => Err(Error::UnsupportedFeature(format!(
                "Tensor '{}' has unsupported element type {}",
                tensor.name, other
            ))),
        }
    }

    /// Encode into a graph constant named `name`
    pub fn to_model_tensor(&self, name: &str) -> model::Tensor {
        let dims: Vec<i64> = self.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<u8> = match self {
            Tensor::Float(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Tensor::Double(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Tensor::Int32(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Tensor::Int64(a) => a.iter().flat_map(|v| v.to_le_bytes()).collect(),
            Tensor::Bool(a) => a.iter().map(|&b| b as u8).collect(),
            Tensor::String(a) => {
                return model::Tensor::from_strings(name, dims, a.iter().cloned().collect())
            }
        };
        model::Tensor::new(name, self.data_type(), dims, data)
    }

    /// Values flattened in row-major order as JSON
    pub fn to_json_values(&self) -> serde_json::Value {
        match self {
            Tensor::Float(a) => a.iter().map(|&v| serde_json::json!(v)).collect(),
            Tensor::Double(a) => a.iter().map(|&v| serde_json::json!(v)).collect(),
            Tensor::Int32(a) => a.iter().map(|&v| serde_json::json!(v)).collect(),
            Tensor::Int64(a) => a.iter().map(|&v| serde_json::json!(v)).collect(),
            Tensor::Bool(a) => a.iter().map(|&v| serde_json::json!(v)).collect(),
            Tensor::String(a) => a.iter().map(|v| serde_json::json!(v)).collect(),
        }
    }

    /// Integer contents as `i64` (axes, shapes, counts)
    pub fn as_i64_vec(&self) -> Result<Vec<i64>> {
        match self {
            Tensor::Int64(a) => Ok(a.iter().copied().collect()),
            Tensor::Int32(a) => Ok(a.iter().map(|&v| v as i64).collect()),
            other => Err(Error::ValidationError(format!(
                "expected an integer tensor, got {}",
                other.describe()
            ))),
        }
    }

    /// Truth value of a single-element tensor
    pub fn as_scalar_bool(&self) -> Result<bool> {
        if self.len() != 1 {
            return Err(Error::ValidationError(format!(
                "expected a single element, got {}",
                self.describe()
            )));
        }
        match self {
            Tensor::Bool(a) => Ok(a.iter().any(|&v| v)),
            Tensor::Float(a) => Ok(a.iter().any(|&v| v != 0.0)),
            Tensor::Double(a) => Ok(a.iter().any(|&v| v != 0.0)),
            Tensor::Int32(a) => Ok(a.iter().any(|&v| v != 0)),
            Tensor::Int64(a) => Ok(a.iter().any(|&v| v != 0)),
            Tensor::String(_) => Err(Error::ValidationError(
                "a string tensor has no truth value".to_string(),
            )),
        }
    }

    /// Reshape into `shape`, copying only when the layout is not contiguous
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        Ok(map_tensor!(self, a => a.as_standard_layout().into_owned().into_shape(IxDyn(shape))?))
    }

    /// Permute axes; `perm` must be a permutation of `0..ndim`
    pub fn permute(&self, perm: &[usize]) -> Result<Tensor> {
        let mut sorted = perm.to_vec();
        sorted.sort_unstable();
        if sorted != (0..self.ndim()).collect::<Vec<_>>() {
            return Err(Error::ValidationError(format!(
                "invalid permutation {:?} for {}",
                perm,
                self.describe()
            )));
        }
        Ok(map_tensor!(self, a => a.view().permuted_axes(perm.to_vec()).as_standard_layout().into_owned()))
    }

    /// Insert unit axes at the given (sorted, output-relative) positions
    pub fn insert_axes(&self, axes: &[usize]) -> Result<Tensor> {
        let rank = self.ndim() + axes.len();
        if axes.iter().any(|&a| a >= rank) {
            return Err(Error::ValidationError(format!(
                "axes {:?} out of range for output rank {}",
                axes, rank
            )));
        }
        let mut sorted = axes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut result = self.clone();
        for &axis in &sorted {
            result = map_tensor!(result, a => a.insert_axis(Axis(axis)));
        }
        Ok(result)
    }

    /// Remove unit axes; all of them when `axes` is empty
    pub fn squeeze_axes(&self, axes: &[usize]) -> Result<Tensor> {
        let shape = self.shape().to_vec();
        let mut targets: Vec<usize> = if axes.is_empty() {
            (0..shape.len()).filter(|&i| shape[i] == 1).collect()
        } else {
            axes.to_vec()
        };
        for &axis in &targets {
            if shape.get(axis) != Some(&1) {
                return Err(Error::ValidationError(format!(
                    "cannot squeeze axis {} of {}",
                    axis,
                    self.describe()
                )));
            }
        }
        targets.sort_unstable();
        targets.dedup();
        let mut result = self.clone();
        for &axis in targets.iter().rev() {
            result = map_tensor!(result, a => a.index_axis_move(Axis(axis), 0));
        }
        Ok(result)
    }

    /// Slice `index` along the first axis
    pub fn index_axis0(&self, index: usize) -> Result<Tensor> {
        if self.ndim() == 0 || index >= self.shape()[0] {
            return Err(Error::ValidationError(format!(
                "index {} out of range along axis 0 of {}",
                index,
                self.describe()
            )));
        }
        Ok(map_tensor!(self, a => a.index_axis(Axis(0), index).to_owned()))
    }

    /// Stack tensors of identical type and shape along a new first axis
    pub fn stack(tensors: &[Tensor]) -> Result<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::ValidationError("cannot stack zero tensors".to_string()))?;
        fn views<T: TensorElement>(tensors: &[Tensor]) -> Result<Vec<ArrayViewD<'_, T>>> {
            tensors.iter().map(|t| Ok(t.as_array::<T>()?.view())).collect()
        }
        Ok(match first {
            Tensor::Float(_) => Tensor::Float(ndarray::stack(Axis(0), &views::<f32>(tensors)?)?),
            Tensor::Double(_) => Tensor::Double(ndarray::stack(Axis(0), &views::<f64>(tensors)?)?),
            Tensor::Int32(_) => Tensor::Int32(ndarray::stack(Axis(0), &views::<i32>(tensors)?)?),
            Tensor::Int64(_) => Tensor::Int64(ndarray::stack(Axis(0), &views::<i64>(tensors)?)?),
            Tensor::Bool(_) => Tensor::Bool(ndarray::stack(Axis(0), &views::<bool>(tensors)?)?),
            Tensor::String(_) => {
                Tensor::String(ndarray::stack(Axis(0), &views::<String>(tensors)?)?)
            }
        })
    }

    /// Concatenate tensors of identical type along `axis`
    pub fn concat(tensors: &[&Tensor], axis: usize) -> Result<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::ValidationError("cannot concatenate zero tensors".to_string()))?;
        if axis >= first.ndim() {
            return Err(Error::ValidationError(format!(
                "axis {} out of range for {}",
                axis,
                first.describe()
            )));
        }
        fn views<'a, T: TensorElement>(tensors: &[&'a Tensor]) -> Result<Vec<ArrayViewD<'a, T>>> {
            tensors.iter().map(|t| Ok(t.as_array::<T>()?.view())).collect()
        }
        let axis = Axis(axis);
        Ok(match first {
            Tensor::Float(_) => Tensor::Float(ndarray::concatenate(axis, &views::<f32>(tensors)?)?),
            Tensor::Double(_) => Tensor::Double(ndarray::concatenate(axis, &views::<f64>(tensors)?)?),
            Tensor::Int32(_) => Tensor::Int32(ndarray::concatenate(axis, &views::<i32>(tensors)?)?),
            Tensor::Int64(_) => Tensor::Int64(ndarray::concatenate(axis, &views::<i64>(tensors)?)?),
            Tensor::Bool(_) => Tensor::Bool(ndarray::concatenate(axis, &views::<bool>(tensors)?)?),
            Tensor::String(_) => {
                Tensor::String(ndarray::concatenate(axis, &views::<String>(tensors)?)?)
            }
        })
    }

    /// Convert to another element type (float to int truncates toward zero)
    pub fn cast(&self, to: DataType) -> Result<Tensor> {
        match self {
            Tensor::Float(a) => cast_numeric(a, to),
            Tensor::Double(a) => cast_numeric(a, to),
            Tensor::Int32(a) => cast_numeric(a, to),
            Tensor::Int64(a) => cast_numeric(a, to),
            Tensor::Bool(a) => match to {
                DataType::Bool => Ok(self.clone()),
                _ => cast_numeric(&a.mapv(|b| if b { 1i64 } else { 0 }), to),
            },
            Tensor::String(a) => match to {
                DataType::String => Ok(self.clone()),
                DataType::Float => Ok(Tensor::Float(parse_strings(a)?)),
                DataType::Double => Ok(Tensor::Double(parse_strings(a)?)),
                DataType::Int32 => Ok(Tensor::Int32(parse_strings(a)?)),
                DataType::Int64 => Ok(Tensor::Int64(parse_strings(a)?)),
                other => Err(Error::UnsupportedFeature(format!(
                    "cannot cast string tensor to {}",
                    other
                ))),
            },
        }
    }
}

fn cast_numeric<T>(a: &ArrayD<T>, to: DataType) -> Result<Tensor>
where
    T: Numeric + AsPrimitive<f32> + AsPrimitive<f64> + AsPrimitive<i32> + AsPrimitive<i64>,
{
    Ok(match to {
        DataType::Float => Tensor::Float(a.mapv(|v| v.as_())),
        DataType::Double => Tensor::Double(a.mapv(|v| v.as_())),
        DataType::Int32 => Tensor::Int32(a.mapv(|v| v.as_())),
        DataType::Int64 => Tensor::Int64(a.mapv(|v| v.as_())),
        DataType::Bool => Tensor::Bool(a.mapv(|v| v != T::zero())),
        DataType::String => Tensor::String(a.mapv(|v| v.to_string())),
        other => {
            return Err(Error::UnsupportedFeature(format!(
                "cannot cast to {}",
                other
            )))
        }
    })
}

fn parse_strings<T: std::str::FromStr>(a: &ArrayD<String>) -> Result<ArrayD<T>> {
    let values = a
        .iter()
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|_| Error::ValidationError(format!("cannot parse '{}' as a number", s)))
        })
        .collect::<Result<Vec<T>>>()?;
    Ok(ArrayD::from_shape_vec(a.raw_dim(), values)?)
}

/// Numpy-style broadcast of two shapes
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Shape> {
    let rank = a.len().max(b.len());
    let mut shape = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(Error::ValidationError(format!(
                    "shapes {:?} and {:?} cannot be broadcast together",
                    a, b
                )))
            }
        };
    }
    Ok(shape)
}

/// Combine two arrays element-wise after broadcasting them to a common shape
pub fn broadcast_zip<A, B, R, F>(a: &ArrayD<A>, b: &ArrayD<B>, mut f: F) -> Result<ArrayD<R>>
where
    F: FnMut(&A, &B) -> R,
{
    let shape = broadcast_shapes(a.shape(), b.shape())?;
    let av = a
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| Error::ValidationError(format!("cannot broadcast {:?} to {:?}", a.shape(), shape)))?;
    let bv = b
        .broadcast(IxDyn(&shape))
        .ok_or_else(|| Error::ValidationError(format!("cannot broadcast {:?} to {:?}", b.shape(), shape)))?;
    Ok(Zip::from(&av).and(&bv).map_collect(|x, y| f(x, y)))
}

fn numeric_binary<T: Numeric>(op: BinaryOp, a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>> {
    let mut failed = false;
    let result = broadcast_zip(a, b, |&x, &y| match op.apply(x, y) {
        Some(v) => v,
        None => {
            failed = true;
            T::zero()
        }
    })?;
    if failed {
        return Err(Error::ValidationError("integer division by zero".to_string()));
    }
    Ok(result)
}

/// Broadcasting arithmetic on two tensors of the same numeric type
pub fn binary_arithmetic(op: BinaryOp, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    match (a, b) {
        (Tensor::Float(x), Tensor::Float(y)) => Ok(Tensor::Float(numeric_binary(op, x, y)?)),
        (Tensor::Double(x), Tensor::Double(y)) => Ok(Tensor::Double(numeric_binary(op, x, y)?)),
        (Tensor::Int32(x), Tensor::Int32(y)) => Ok(Tensor::Int32(numeric_binary(op, x, y)?)),
        (Tensor::Int64(x), Tensor::Int64(y)) => Ok(Tensor::Int64(numeric_binary(op, x, y)?)),
        _ => Err(Error::ValidationError(format!(
            "{:?} expects two numeric tensors of the same type, got {} and {}",
            op,
            a.describe(),
            b.describe()
        ))),
    }
}

/// Pick from `x` where `condition` holds and from `y` elsewhere, with broadcasting
pub fn where_select(condition: &Tensor, x: &Tensor, y: &Tensor) -> Result<Tensor> {
    let cond = condition.as_array::<bool>()?;
    fn select<T: Clone>(c: &ArrayD<bool>, x: &ArrayD<T>, y: &ArrayD<T>) -> Result<ArrayD<T>> {
        let shape = broadcast_shapes(&broadcast_shapes(c.shape(), x.shape())?, y.shape())?;
        let dim = IxDyn(&shape);
        let err = || Error::ValidationError(format!("cannot broadcast Where operands to {:?}", shape));
        let cv = c.broadcast(dim.clone()).ok_or_else(err)?;
        let xv = x.broadcast(dim.clone()).ok_or_else(err)?;
        let yv = y.broadcast(dim).ok_or_else(err)?;
        Ok(Zip::from(&cv)
            .and(&xv)
            .and(&yv)
            .map_collect(|&c, a, b| if c { a.clone() } else { b.clone() }))
    }
    match (x, y) {
        (Tensor::Float(a), Tensor::Float(b)) => Ok(Tensor::Float(select(cond, a, b)?)),
        (Tensor::Double(a), Tensor::Double(b)) => Ok(Tensor::Double(select(cond, a, b)?)),
        (Tensor::Int32(a), Tensor::Int32(b)) => Ok(Tensor::Int32(select(cond, a, b)?)),
        (Tensor::Int64(a), Tensor::Int64(b)) => Ok(Tensor::Int64(select(cond, a, b)?)),
        (Tensor::Bool(a), Tensor::Bool(b)) => Ok(Tensor::Bool(select(cond, a, b)?)),
        (Tensor::String(a), Tensor::String(b)) => Ok(Tensor::String(select(cond, a, b)?)),
        _ => Err(Error::ValidationError(format!(
            "x and y should share the same type, got {} and {}",
            x.describe(),
            y.describe()
        ))),
    }
}

/// Resolve a possibly negative axis against `rank`
pub fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    if resolved < 0 || resolved >= rank_i {
        return Err(Error::ValidationError(format!(
            "axis {} out of range for rank {}",
            axis, rank
        )));
    }
    Ok(resolved as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_shapes() {
        assert_eq!(broadcast_shapes(&[3, 2], &[1]).unwrap(), vec![3, 2]);
        assert_eq!(broadcast_shapes(&[3, 1], &[1, 4]).unwrap(), vec![3, 4]);
        assert_eq!(broadcast_shapes(&[], &[2, 2]).unwrap(), vec![2, 2]);
        assert!(broadcast_shapes(&[3, 2], &[3]).is_err());
    }

    #[test]
    fn test_binary_arithmetic_broadcasts() {
        let x = Tensor::from_shape_vec(&[3, 2], vec![1.0f32, 2.0, 4.0, 5.0, 5.0, 4.0]).unwrap();
        let one = Tensor::from_shape_vec(&[1], vec![1.0f32]).unwrap();
        let sum = binary_arithmetic(BinaryOp::Add, &x, &one).unwrap();
        assert_eq!(
            sum,
            Tensor::from_shape_vec(&[3, 2], vec![2.0f32, 3.0, 5.0, 6.0, 6.0, 5.0]).unwrap()
        );
    }

    #[test]
    fn test_integer_division_by_zero_is_an_error() {
        let a = Tensor::from_shape_vec(&[2], vec![4i64, 6]).unwrap();
        let b = Tensor::from_shape_vec(&[2], vec![2i64, 0]).unwrap();
        assert!(matches!(
            binary_arithmetic(BinaryOp::Div, &a, &b),
            Err(Error::ValidationError(_))
        ));
    }

    #[test]
    fn test_mixed_types_are_rejected() {
        let a = Tensor::from_shape_vec(&[1], vec![1.0f32]).unwrap();
        let b = Tensor::from_shape_vec(&[1], vec![1i64]).unwrap();
        assert!(binary_arithmetic(BinaryOp::Mul, &a, &b).is_err());
    }

    #[test]
    fn test_model_tensor_conversion_keeps_bits() {
        let original = Tensor::from_shape_vec(&[2, 2], vec![-0.0f32, 1.5, f32::MAX, 3.25]).unwrap();
        let encoded = original.to_model_tensor("w");
        assert_eq!(encoded.data.len(), 16);
        let decoded = Tensor::from_model_tensor(&encoded).unwrap();
        let a = decoded.as_array::<f32>().unwrap();
        assert_eq!(a.iter().next().unwrap().to_bits(), (-0.0f32).to_bits());
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_incomplete_model_tensor_is_rejected() {
        let tensor = model::Tensor::new("w", DataType::Float, vec![2, 2], vec![0u8; 8]);
        assert!(matches!(
            Tensor::from_model_tensor(&tensor),
            Err(Error::StructuralError(_))
        ));
    }

    #[test]
    fn test_squeeze_and_insert_axes() {
        let t = Tensor::from_shape_vec(&[3, 1], vec![1i64, 2, 3]).unwrap();
        let squeezed = t.squeeze_axes(&[1]).unwrap();
        assert_eq!(squeezed.shape(), &[3]);
        let expanded = squeezed.insert_axes(&[0, 2]).unwrap();
        assert_eq!(expanded.shape(), &[1, 3, 1]);
        assert!(t.squeeze_axes(&[0]).is_err());
    }

    #[test]
    fn test_cast_float_to_int_and_bool() {
        let t = Tensor::from_shape_vec(&[3], vec![1.7f32, -2.2, 0.0]).unwrap();
        assert_eq!(
            t.cast(DataType::Int64).unwrap(),
            Tensor::from_shape_vec(&[3], vec![1i64, -2, 0]).unwrap()
        );
        assert_eq!(
            t.cast(DataType::Bool).unwrap(),
            Tensor::from_shape_vec(&[3], vec![true, true, false]).unwrap()
        );
    }

    #[test]
    fn test_where_select() {
        let c = Tensor::from_shape_vec(&[2], vec![true, false]).unwrap();
        let x = Tensor::from_shape_vec(&[2], vec![1i64, 2]).unwrap();
        let y = Tensor::from_shape_vec(&[2], vec![10i64, 20]).unwrap();
        assert_eq!(
            where_select(&c, &x, &y).unwrap(),
            Tensor::from_shape_vec(&[2], vec![1i64, 20]).unwrap()
        );
    }

    #[test]
    fn test_stack_and_index() {
        let rows = vec![
            Tensor::from_shape_vec(&[2], vec![1.0f64, 2.0]).unwrap(),
            Tensor::from_shape_vec(&[2], vec![3.0f64, 4.0]).unwrap(),
        ];
        let stacked = Tensor::stack(&rows).unwrap();
        assert_eq!(stacked.shape(), &[2, 2]);
        assert_eq!(stacked.index_axis0(1).unwrap(), rows[1]);
    }
}
