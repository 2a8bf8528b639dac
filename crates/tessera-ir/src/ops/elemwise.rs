//! Broadcasting element-wise arithmetic.

use super::*;
use crate::op::{KernelOutput, OpDef};
use crate::tensor::TensorData;

pub(super) fn register(registry: &mut OpRegistry) {
    registry.register(OpDef::new(ADD, 2, binary_rel).with_kernel(add_kernel));
    registry.register(OpDef::new(SUBTRACT, 2, binary_rel).with_kernel(subtract_kernel));
    registry.register(OpDef::new(MULTIPLY, 2, binary_rel).with_kernel(multiply_kernel));
}

/// Numpy-style broadcast of two shapes.
fn broadcast_dims(lhs: &[Dim], rhs: &[Dim]) -> Option<Dims> {
    let rank = lhs.len().max(rhs.len());
    let at = |dims: &[Dim], i: usize| {
        let offset = rank - dims.len();
        if i < offset { Dim::Known(1) } else { dims[i - offset] }
    };
    (0..rank)
        .map(|i| match (at(lhs, i), at(rhs, i)) {
            (Dim::Known(1), d) | (d, Dim::Known(1)) => Some(d),
            (Dim::Known(a), Dim::Known(b)) => (a == b).then_some(Dim::Known(a)),
            (Dim::Any, d) | (d, Dim::Any) => Some(d),
        })
        .collect()
}

fn binary_rel(args: &[Type], _attrs: &Attrs) -> Result<Type, TypeError> {
    let lhs = tensor_arg(args, 0, "lhs")?;
    let rhs = tensor_arg(args, 1, "rhs")?;
    if lhs.dtype != rhs.dtype {
        return Err(TypeError::mismatch(lhs.dtype, rhs.dtype));
    }
    let shape = broadcast_dims(&lhs.shape, &rhs.shape).ok_or_else(|| {
        TypeError::invalid(format_args!("cannot broadcast {lhs} with {rhs}"))
    })?;
    Ok(Type::Tensor(TensorType::new(shape, lhs.dtype)))
}

fn binary_kernel(
    args: &[Tensor],
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<KernelOutput, KernelError> {
    let (lhs, rhs) = (&args[0], &args[1]);
    if lhs.dtype() != rhs.dtype() {
        return Err(KernelError::invalid(format_args!(
            "operand dtypes differ: {} and {}",
            lhs.dtype(),
            rhs.dtype()
        )));
    }
    let dims = broadcast_dims(&shape_dims(lhs.shape()), &shape_dims(rhs.shape()))
        .ok_or_else(|| {
            KernelError::invalid(format_args!(
                "cannot broadcast {:?} with {:?}",
                lhs.shape(),
                rhs.shape()
            ))
        })?;
    let shape = known_shape(&dims)?;
    let lhs_at = broadcast_indices(lhs.shape(), &shape);
    let rhs_at = broadcast_indices(rhs.shape(), &shape);
    let pairs = lhs_at.iter().zip(&rhs_at);
    let data = match (lhs.data(), rhs.data()) {
        (TensorData::Int(a), TensorData::Int(b)) => {
            TensorData::Int(pairs.map(|(&i, &j)| int_op(a[i], b[j])).collect())
        }
        (TensorData::Float(a), TensorData::Float(b)) => {
            TensorData::Float(pairs.map(|(&i, &j)| float_op(a[i], b[j])).collect())
        }
        _ => return Err(KernelError::invalid("operand storage differs")),
    };
    Ok(KernelOutput::Single(Tensor::new(lhs.dtype(), &shape, data)?))
}

fn add_kernel(args: &[Tensor], _attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    binary_kernel(args, i64::wrapping_add, |a, b| a + b)
}

fn subtract_kernel(args: &[Tensor], _attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    binary_kernel(args, i64::wrapping_sub, |a, b| a - b)
}

fn multiply_kernel(args: &[Tensor], _attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    binary_kernel(args, i64::wrapping_mul, |a, b| a * b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DType;

    #[test]
    fn broadcasting_shapes() {
        let dims = |d: &[usize]| shape_dims(d);
        assert_eq!(broadcast_dims(&dims(&[2, 1]), &dims(&[3])), Some(dims(&[2, 3])));
        assert_eq!(broadcast_dims(&dims(&[2]), &dims(&[3])), None);
        let any: Dims = [Dim::Any].into_iter().collect();
        assert_eq!(broadcast_dims(&any, &dims(&[4])), Some(dims(&[4])));
        assert_eq!(broadcast_dims(&any, &dims(&[1])), Some(any.clone()));
    }

    #[test]
    fn multiply_broadcasts_scalar() {
        let shape = Tensor::vector_i64(&[2, 3]);
        let out = multiply_kernel(&[shape, Tensor::scalar_i64(2)], &Attrs::None).unwrap();
        assert_eq!(out, KernelOutput::Single(Tensor::vector_i64(&[4, 6])));
    }

    #[test]
    fn mixed_dtypes_are_rejected() {
        let args = [Type::tensor(&[2], DType::Int64), Type::tensor(&[2], DType::Int32)];
        assert_eq!(
            binary_rel(&args, &Attrs::None).unwrap_err().to_string(),
            "expected int64, found int32"
        );
    }
}
