//! Standard operator library.
//!
//! Every operator comes with a type relation. Most also carry a reference
//! kernel, which the interpreter and constant folding use to evaluate calls
//! on constant inputs. Dynamic variants (`dyn.*`) take one parameter as a
//! runtime tensor argument instead of an attribute.

mod algorithm;
mod elemwise;
mod transform;

use crate::error::{KernelError, TypeError};
use crate::tensor::{num_elements, strides, unravel};
use crate::{Attrs, Dim, Dims, OpRegistry, Tensor, TensorType, Type};

pub const RESHAPE: &str = "reshape";
pub const DYN_RESHAPE: &str = "dyn.reshape";
pub const TILE: &str = "tile";
pub const DYN_TILE: &str = "dyn.tile";
pub const TOPK: &str = "topk";
pub const DYN_TOPK: &str = "dyn.topk";
pub const BROADCAST_TO: &str = "broadcast_to";
pub const DYN_BROADCAST_TO: &str = "dyn.broadcast_to";
pub const ZEROS: &str = "zeros";
pub const DYN_ZEROS: &str = "dyn.zeros";
pub const ONES: &str = "ones";
pub const DYN_ONES: &str = "dyn.ones";
pub const FULL: &str = "full";
pub const DYN_FULL: &str = "dyn.full";
pub const SHAPE_OF: &str = "shape_of";
pub const CONCATENATE: &str = "concatenate";
pub const ADD: &str = "add";
pub const SUBTRACT: &str = "subtract";
pub const MULTIPLY: &str = "multiply";

pub(crate) fn register_standard(registry: &mut OpRegistry) {
    transform::register(registry);
    algorithm::register(registry);
    elemwise::register(registry);
}

pub use transform::resolve_newshape;

// === Type relation helpers ===

fn tensor_arg<'a>(args: &'a [Type], index: usize, what: &str) -> Result<&'a TensorType, TypeError> {
    match args.get(index) {
        Some(Type::Tensor(t)) => Ok(t),
        Some(other) => Err(TypeError::invalid(format_args!(
            "{what} must be a tensor, found {other}"
        ))),
        None => Err(TypeError::invalid(format_args!("missing {what}"))),
    }
}

/// Length of a rank-1 integer parameter tensor such as a shape or a
/// repetition vector.
fn vector_param_len(args: &[Type], index: usize, what: &str) -> Result<usize, TypeError> {
    let ty = tensor_arg(args, index, what)?;
    if !ty.dtype.is_int() {
        return Err(TypeError::invalid(format_args!(
            "{what} must have an integer dtype, found {}",
            ty.dtype
        )));
    }
    match ty.shape.as_slice() {
        [Dim::Known(n)] => Ok(*n),
        [Dim::Any] => Err(TypeError::invalid(format_args!(
            "{what} must have a static length"
        ))),
        _ => Err(TypeError::invalid(format_args!(
            "{what} must be rank 1, found rank {}",
            ty.rank()
        ))),
    }
}

fn scalar_param(args: &[Type], index: usize, what: &str) -> Result<(), TypeError> {
    let ty = tensor_arg(args, index, what)?;
    if ty.rank() != 0 {
        return Err(TypeError::invalid(format_args!(
            "{what} must be a scalar, found rank {}",
            ty.rank()
        )));
    }
    Ok(())
}

fn any_dims(rank: usize) -> Dims {
    smallvec::smallvec![Dim::Any; rank]
}

fn known_dims(values: &[i64], what: &str) -> Result<Dims, TypeError> {
    values
        .iter()
        .map(|&v| {
            usize::try_from(v)
                .map(Dim::Known)
                .map_err(|_| TypeError::invalid(format_args!("{what} contains negative value {v}")))
        })
        .collect()
}

fn expect_attrs<'a, T>(
    attrs: &'a Attrs,
    expected: &str,
    get: impl FnOnce(&'a Attrs) -> Option<&'a T>,
) -> Result<&'a T, TypeError> {
    get(attrs).ok_or_else(|| {
        TypeError::invalid(format_args!(
            "expected {expected} attributes, found {}",
            attrs.kind()
        ))
    })
}

/// Normalize a possibly negative axis against `rank`.
fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = i64::try_from(rank).ok()?;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

// === Kernel helpers ===

fn kernel_attrs<'a, T>(
    attrs: &'a Attrs,
    expected: &str,
    get: impl FnOnce(&'a Attrs) -> Option<&'a T>,
) -> Result<&'a T, KernelError> {
    get(attrs).ok_or_else(|| {
        KernelError::invalid(format_args!(
            "expected {expected} attributes, found {}",
            attrs.kind()
        ))
    })
}

fn int_values<'a>(tensor: &'a Tensor, what: &str) -> Result<&'a [i64], KernelError> {
    tensor
        .as_i64_slice()
        .ok_or_else(|| KernelError::invalid(format_args!("{what} must be an integer tensor")))
}

fn vector_values<'a>(tensor: &'a Tensor, what: &str) -> Result<&'a [i64], KernelError> {
    if tensor.ndim() != 1 {
        return Err(KernelError::invalid(format_args!(
            "{what} must be rank 1, found rank {}",
            tensor.ndim()
        )));
    }
    int_values(tensor, what)
}

fn to_shape(values: &[i64], what: &str) -> Result<Vec<usize>, KernelError> {
    values
        .iter()
        .map(|&v| {
            usize::try_from(v).map_err(|_| {
                KernelError::invalid(format_args!("{what} contains negative value {v}"))
            })
        })
        .collect()
}

fn known_shape(dims: &[Dim]) -> Result<Vec<usize>, KernelError> {
    dims.iter()
        .map(|d| {
            d.known()
                .ok_or_else(|| KernelError::invalid("output shape is not fully known"))
        })
        .collect()
}

fn shape_dims(shape: &[usize]) -> Dims {
    shape.iter().map(|&d| Dim::Known(d)).collect()
}

/// Flat input index feeding each output element when `in_shape` is
/// broadcast to `out_shape` (numpy rules, right-aligned).
fn broadcast_indices(in_shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let offset = out_shape.len() - in_shape.len();
    let in_strides = strides(in_shape);
    let mut index = vec![0; out_shape.len()];
    (0..num_elements(out_shape))
        .map(|flat| {
            unravel(flat, out_shape, &mut index);
            in_shape
                .iter()
                .zip(&in_strides)
                .enumerate()
                .map(|(axis, (&dim, &stride))| {
                    if dim == 1 { 0 } else { index[axis + offset] * stride }
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_normalization() {
        assert_eq!(normalize_axis(-1, 3), Some(2));
        assert_eq!(normalize_axis(0, 3), Some(0));
        assert_eq!(normalize_axis(3, 3), None);
        assert_eq!(normalize_axis(-4, 3), None);
        assert_eq!(normalize_axis(0, 0), None);
    }

    #[test]
    fn broadcast_index_map() {
        // [3] broadcast to [2, 3] repeats the row.
        assert_eq!(broadcast_indices(&[3], &[2, 3]), vec![0, 1, 2, 0, 1, 2]);
        // [2, 1] broadcast to [2, 3] repeats each element along the row.
        assert_eq!(broadcast_indices(&[2, 1], &[2, 3]), vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn standard_library_is_complete() {
        let registry = OpRegistry::standard();
        for name in [
            RESHAPE,
            DYN_RESHAPE,
            TILE,
            DYN_TILE,
            TOPK,
            DYN_TOPK,
            BROADCAST_TO,
            DYN_BROADCAST_TO,
            ZEROS,
            DYN_ZEROS,
            ONES,
            DYN_ONES,
            FULL,
            DYN_FULL,
            SHAPE_OF,
            CONCATENATE,
            ADD,
            SUBTRACT,
            MULTIPLY,
        ] {
            let op = registry.lookup(name).unwrap();
            assert!(registry.def(op).unwrap().kernel().is_some(), "{name}");
        }
        assert_eq!(registry.len(), 19);
    }
}
