//! Dense tensor values embedded in `Constant` nodes.

use std::fmt;

use smallvec::SmallVec;

use crate::error::TensorError;

/// Tensor dimensions, row-major.
pub type Shape = SmallVec<[usize; 4]>;

/// Element type of a tensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl DType {
    /// Integer-like dtypes are stored as `i64`.
    pub fn is_int(self) -> bool {
        matches!(self, DType::Bool | DType::Int32 | DType::Int64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::Float32 | DType::Float64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float32 => "float32",
            DType::Float64 => "float64",
        }
    }

    fn normalize_int(self, v: i64) -> i64 {
        match self {
            DType::Bool => (v != 0) as i64,
            DType::Int32 => v as i32 as i64,
            _ => v,
        }
    }

    fn normalize_float(self, v: f64) -> f64 {
        match self {
            DType::Float32 => v as f32 as f64,
            _ => v,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element storage. Integer and boolean dtypes use `Int`, floats use `Float`.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    Int(Vec<i64>),
    Float(Vec<f64>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::Int(v) => v.len(),
            TensorData::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn storage_name(&self) -> &'static str {
        match self {
            TensorData::Int(_) => "integer",
            TensorData::Float(_) => "floating-point",
        }
    }
}

/// A rank- and dtype-tagged dense tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    dtype: DType,
    shape: Shape,
    data: TensorData,
}

impl Tensor {
    /// Build a tensor, checking the element count and storage kind.
    ///
    /// Values are normalized to the dtype (`int32` wraps, `float32` rounds,
    /// `bool` collapses to 0/1).
    pub fn new(dtype: DType, shape: &[usize], data: TensorData) -> Result<Self, TensorError> {
        let expected = num_elements(shape);
        if data.len() != expected {
            return Err(TensorError::ElementCount {
                shape: shape.to_vec(),
                expected,
                found: data.len(),
            });
        }
        let data = match data {
            TensorData::Int(values) if dtype.is_int() => {
                TensorData::Int(values.into_iter().map(|v| dtype.normalize_int(v)).collect())
            }
            TensorData::Float(values) if dtype.is_float() => TensorData::Float(
                values
                    .into_iter()
                    .map(|v| dtype.normalize_float(v))
                    .collect(),
            ),
            other => {
                return Err(TensorError::StorageMismatch {
                    dtype,
                    storage: other.storage_name(),
                });
            }
        };
        Ok(Self {
            dtype,
            shape: shape.iter().copied().collect(),
            data,
        })
    }

    pub fn from_i64(dtype: DType, shape: &[usize], data: Vec<i64>) -> Result<Self, TensorError> {
        Self::new(dtype, shape, TensorData::Int(data))
    }

    pub fn from_f64(dtype: DType, shape: &[usize], data: Vec<f64>) -> Result<Self, TensorError> {
        Self::new(dtype, shape, TensorData::Float(data))
    }

    /// A 0-d `int64` tensor.
    pub fn scalar_i64(value: i64) -> Self {
        Self {
            dtype: DType::Int64,
            shape: Shape::new(),
            data: TensorData::Int(vec![value]),
        }
    }

    /// A rank-1 `int64` tensor.
    pub fn vector_i64(values: &[i64]) -> Self {
        Self {
            dtype: DType::Int64,
            shape: smallvec::smallvec![values.len()],
            data: TensorData::Int(values.to_vec()),
        }
    }

    /// A tensor of `shape` where every element is `value` cast to `dtype`.
    pub fn filled(dtype: DType, shape: &[usize], value: f64) -> Self {
        let count = num_elements(shape);
        let data = if dtype.is_int() {
            TensorData::Int(vec![dtype.normalize_int(value as i64); count])
        } else {
            TensorData::Float(vec![dtype.normalize_float(value); count])
        };
        Self {
            dtype,
            shape: shape.iter().copied().collect(),
            data,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    /// Integer elements, or `None` for floating-point tensors.
    pub fn as_i64_slice(&self) -> Option<&[i64]> {
        match &self.data {
            TensorData::Int(v) => Some(v),
            TensorData::Float(_) => None,
        }
    }

    pub fn element_i64(&self, index: usize) -> Option<i64> {
        self.as_i64_slice().and_then(|v| v.get(index).copied())
    }

    pub fn element_f64(&self, index: usize) -> f64 {
        match &self.data {
            TensorData::Int(v) => v[index] as f64,
            TensorData::Float(v) => v[index],
        }
    }

    /// Same elements under a new shape with the same element count.
    pub fn reshaped(&self, shape: &[usize]) -> Result<Self, TensorError> {
        Self::new(self.dtype, shape, self.data.clone())
    }

    /// New tensor whose `i`-th element is this tensor's `indices[i]`-th element.
    ///
    /// # Panics
    ///
    /// Panics if `indices.len()` differs from the element count of `shape`
    /// or an index is out of range.
    pub fn gather(&self, indices: &[usize], shape: &[usize]) -> Self {
        assert_eq!(
            indices.len(),
            num_elements(shape),
            "gather: index count must match the output shape"
        );
        let data = match &self.data {
            TensorData::Int(v) => TensorData::Int(indices.iter().map(|&i| v[i]).collect()),
            TensorData::Float(v) => TensorData::Float(indices.iter().map(|&i| v[i]).collect()),
        };
        Self {
            dtype: self.dtype,
            shape: shape.iter().copied().collect(),
            data,
        }
    }

    /// Convert elements to another dtype.
    pub fn cast(&self, dtype: DType) -> Self {
        let data = match (&self.data, dtype.is_int()) {
            (TensorData::Int(v), true) => {
                TensorData::Int(v.iter().map(|&x| dtype.normalize_int(x)).collect())
            }
            (TensorData::Int(v), false) => TensorData::Float(
                v.iter().map(|&x| dtype.normalize_float(x as f64)).collect(),
            ),
            (TensorData::Float(v), true) => {
                TensorData::Int(v.iter().map(|&x| dtype.normalize_int(x as i64)).collect())
            }
            (TensorData::Float(v), false) => {
                TensorData::Float(v.iter().map(|&x| dtype.normalize_float(x)).collect())
            }
        };
        Self {
            dtype,
            shape: self.shape.clone(),
            data,
        }
    }
}

impl Tensor {
    fn write_elements(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in 0..self.num_elements() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match &self.data {
                TensorData::Int(v) => write!(f, "{}", v[i])?,
                TensorData::Float(v) => write!(f, "{:?}", v[i])?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ndim() {
            0 => self.write_elements(f),
            1 => {
                f.write_str("[")?;
                self.write_elements(f)?;
                f.write_str("]")
            }
            _ => write!(f, "meta[{}, {:?}]", self.dtype, self.shape.as_slice()),
        }
    }
}

/// Number of elements in a tensor of `shape`.
pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major strides of `shape`.
pub fn strides(shape: &[usize]) -> Shape {
    let mut strides: Shape = smallvec::smallvec![1; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1];
    }
    strides
}

/// Multi-dimensional index of the `flat`-th element of a tensor of `shape`.
pub fn unravel(mut flat: usize, shape: &[usize], out: &mut [usize]) {
    for axis in (0..shape.len()).rev() {
        let dim = shape[axis];
        out[axis] = if dim == 0 { 0 } else { flat % dim };
        if dim != 0 {
            flat /= dim;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_element_count() {
        let err = Tensor::from_i64(DType::Int64, &[2, 2], vec![1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            TensorError::ElementCount {
                shape: vec![2, 2],
                expected: 4,
                found: 3
            }
        );
    }

    #[test]
    fn new_rejects_mismatched_storage() {
        let err = Tensor::from_f64(DType::Int32, &[1], vec![1.0]).unwrap_err();
        assert!(matches!(err, TensorError::StorageMismatch { .. }));
    }

    #[test]
    fn int32_values_wrap() {
        let t = Tensor::from_i64(DType::Int32, &[1], vec![i64::from(i32::MAX) + 1]).unwrap();
        assert_eq!(t.as_i64_slice(), Some(&[i64::from(i32::MIN)][..]));
    }

    #[test]
    fn strides_and_unravel_agree() {
        let shape = [2, 3, 4];
        assert_eq!(strides(&shape).as_slice(), &[12, 4, 1]);
        let mut idx = [0; 3];
        unravel(23, &shape, &mut idx);
        assert_eq!(idx, [1, 2, 3]);
    }

    #[test]
    fn display_by_rank() {
        assert_eq!(Tensor::scalar_i64(5).to_string(), "5");
        assert_eq!(Tensor::vector_i64(&[2, 3]).to_string(), "[2, 3]");
        let m = Tensor::filled(DType::Float32, &[2, 2], 1.0);
        assert_eq!(m.to_string(), "meta[float32, [2, 2]]");
    }
}
