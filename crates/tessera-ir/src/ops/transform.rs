//! Shape-manipulating and tensor-creation operators.

use std::iter;

use super::*;
use crate::attrs::InitOpAttrs;
use crate::error::KernelError;
use crate::op::{KernelOutput, OpDef};
use crate::tensor::TensorData;
use crate::types::dims_product;
use crate::DType;

pub(super) fn register(registry: &mut OpRegistry) {
    registry.register(OpDef::new(RESHAPE, 1, reshape_rel).with_kernel(reshape_kernel));
    registry.register(OpDef::new(DYN_RESHAPE, 2, dyn_reshape_rel).with_kernel(dyn_reshape_kernel));
    registry.register(OpDef::new(TILE, 1, tile_rel).with_kernel(tile_kernel));
    registry.register(OpDef::new(DYN_TILE, 2, dyn_tile_rel).with_kernel(dyn_tile_kernel));
    registry.register(
        OpDef::new(BROADCAST_TO, 1, broadcast_to_rel).with_kernel(broadcast_to_kernel),
    );
    registry.register(
        OpDef::new(DYN_BROADCAST_TO, 2, dyn_broadcast_to_rel).with_kernel(dyn_broadcast_to_kernel),
    );
    registry.register(OpDef::new(ZEROS, 0, init_rel).with_kernel(zeros_kernel));
    registry.register(OpDef::new(DYN_ZEROS, 1, dyn_init_rel).with_kernel(dyn_zeros_kernel));
    registry.register(OpDef::new(ONES, 0, init_rel).with_kernel(ones_kernel));
    registry.register(OpDef::new(DYN_ONES, 1, dyn_init_rel).with_kernel(dyn_ones_kernel));
    registry.register(OpDef::new(FULL, 1, full_rel).with_kernel(full_kernel));
    registry.register(OpDef::new(DYN_FULL, 2, dyn_full_rel).with_kernel(dyn_full_kernel));
    registry.register(OpDef::new(SHAPE_OF, 1, shape_of_rel).with_kernel(shape_of_kernel));
    registry.register(OpDef::new(CONCATENATE, 2, concatenate_rel).with_kernel(concatenate_kernel));
}

// === reshape ===

/// Output dims of reshaping `input` to `newshape`.
///
/// Besides positive sizes, `newshape` may hold `0` (copy the input dim at
/// the same position), `-1` (infer from the remaining element count, at
/// most once), `-2` (copy all remaining input dims) and `-3` (merge the next
/// two input dims). With `reverse`, special values are matched from the
/// right.
pub fn resolve_newshape(input: &[Dim], newshape: &[i64], reverse: bool) -> Result<Dims, TypeError> {
    if reverse {
        let input: Dims = input.iter().rev().copied().collect();
        let newshape: Vec<i64> = newshape.iter().rev().copied().collect();
        let mut out = resolve_forward(&input, &newshape)?;
        out.reverse();
        return Ok(out);
    }
    resolve_forward(input, newshape)
}

fn resolve_forward(input: &[Dim], newshape: &[i64]) -> Result<Dims, TypeError> {
    let take = |src: &mut usize| {
        let dim = input.get(*src).copied().ok_or_else(|| {
            TypeError::invalid(format_args!(
                "newshape {newshape:?} refers to more dimensions than the input has ({})",
                input.len()
            ))
        });
        *src += 1;
        dim
    };

    let mut out = Dims::new();
    let mut src = 0;
    let mut infer_at = None;
    for &value in newshape {
        match value {
            v if v > 0 => {
                out.push(Dim::Known(v as usize));
                src += 1;
            }
            0 => out.push(take(&mut src)?),
            -1 => {
                if infer_at.is_some() {
                    return Err(TypeError::invalid("newshape can infer at most one dimension"));
                }
                infer_at = Some(out.len());
                out.push(Dim::Any);
                src += 1;
            }
            -2 => {
                while src < input.len() {
                    out.push(input[src]);
                    src += 1;
                }
            }
            -3 => {
                let first = take(&mut src)?;
                let second = take(&mut src)?;
                out.push(element_count(&[first, second])?);
            }
            other => {
                return Err(TypeError::invalid(format_args!(
                    "unsupported newshape value {other}"
                )));
            }
        }
    }

    let total = element_count(input)?;
    if let Some(at) = infer_at {
        let others: Dims = out
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != at)
            .map(|(_, d)| *d)
            .collect();
        let rest = element_count(&others)?;
        out[at] = match (total, rest) {
            (Dim::Known(total), Dim::Known(rest)) => {
                if rest == 0 || total % rest != 0 {
                    return Err(TypeError::invalid(format_args!(
                        "cannot infer a dimension: {total} elements do not split into \
                         groups of {rest}"
                    )));
                }
                Dim::Known(total / rest)
            }
            _ => Dim::Any,
        };
    } else if let (Dim::Known(total), Dim::Known(found)) = (total, element_count(&out)?)
        && total != found
    {
        return Err(TypeError::invalid(format_args!(
            "cannot reshape {total} elements into {found}"
        )));
    }
    Ok(out)
}

/// Element count of `dims`, rejecting sizes that overflow.
fn element_count(dims: &[Dim]) -> Result<Dim, TypeError> {
    dims_product(dims).ok_or_else(|| {
        TypeError::invalid(format_args!("element count of {} overflows", DimList(dims)))
    })
}

fn reshape_rel(args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    let attrs = expect_attrs(attrs, "reshape", Attrs::as_reshape)?;
    let shape = resolve_newshape(&data.shape, &attrs.newshape, attrs.reverse)?;
    Ok(Type::Tensor(TensorType::new(shape, data.dtype)))
}

fn dyn_reshape_rel(args: &[Type], _attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    let rank = vector_param_len(args, 1, "newshape")?;
    Ok(Type::Tensor(TensorType::new(any_dims(rank), data.dtype)))
}

fn reshape_tensor(
    data: &Tensor,
    newshape: &[i64],
    reverse: bool,
) -> Result<KernelOutput, KernelError> {
    let dims = resolve_newshape(&shape_dims(data.shape()), newshape, reverse)
        .map_err(KernelError::invalid)?;
    let shape = known_shape(&dims)?;
    Ok(KernelOutput::Single(data.reshaped(&shape)?))
}

fn reshape_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let attrs = kernel_attrs(attrs, "reshape", Attrs::as_reshape)?;
    reshape_tensor(&args[0], &attrs.newshape, attrs.reverse)
}

fn dyn_reshape_kernel(args: &[Tensor], _attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let newshape = vector_values(&args[1], "newshape")?;
    reshape_tensor(&args[0], newshape, false)
}

// === tile ===

fn pad_front<T: Copy>(values: &[T], rank: usize, fill: T) -> Vec<T> {
    iter::repeat_n(fill, rank - values.len())
        .chain(values.iter().copied())
        .collect()
}

/// Output dims of tiling `data` by `reps`; the shorter side is padded
/// with leading 1s.
fn tile_dims(data: &[Dim], reps: &[Dim]) -> Result<Dims, TypeError> {
    let rank = data.len().max(reps.len());
    let one = Dim::Known(1);
    pad_front(data, rank, one)
        .into_iter()
        .zip(pad_front(reps, rank, one))
        .map(|(d, r)| element_count(&[d, r]))
        .collect()
}

fn tile_rel(args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    let attrs = expect_attrs(attrs, "tile", Attrs::as_tile)?;
    let reps = known_dims(&attrs.reps, "reps")?;
    Ok(Type::Tensor(TensorType::new(
        tile_dims(&data.shape, &reps)?,
        data.dtype,
    )))
}

fn dyn_tile_rel(args: &[Type], _attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    let len = vector_param_len(args, 1, "reps")?;
    Ok(Type::Tensor(TensorType::new(
        tile_dims(&data.shape, &any_dims(len))?,
        data.dtype,
    )))
}

fn tile_tensor(data: &Tensor, reps: &[i64]) -> Result<KernelOutput, KernelError> {
    let reps = to_shape(reps, "reps")?;
    let rank = data.ndim().max(reps.len());
    let in_shape = pad_front(data.shape(), rank, 1);
    let reps = pad_front(&reps, rank, 1);
    let out_dims = tile_dims(&shape_dims(&in_shape), &shape_dims(&reps))
        .map_err(KernelError::invalid)?;
    element_count(&out_dims).map_err(KernelError::invalid)?;
    let out_shape = known_shape(&out_dims)?;

    let in_strides = strides(&in_shape);
    let mut index = vec![0; rank];
    let indices: Vec<usize> = (0..num_elements(&out_shape))
        .map(|flat| {
            unravel(flat, &out_shape, &mut index);
            index
                .iter()
                .zip(&in_shape)
                .zip(&in_strides)
                .map(|((i, d), s)| (i % d) * s)
                .sum()
        })
        .collect();
    Ok(KernelOutput::Single(data.gather(&indices, &out_shape)))
}

fn tile_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let attrs = kernel_attrs(attrs, "tile", Attrs::as_tile)?;
    tile_tensor(&args[0], &attrs.reps)
}

fn dyn_tile_kernel(args: &[Tensor], _attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let reps = vector_values(&args[1], "reps")?;
    tile_tensor(&args[0], reps)
}

// === broadcast_to ===

fn check_broadcastable(data: &[Dim], target: &[Dim]) -> Result<(), TypeError> {
    let fits = data.len() <= target.len()
        && data
            .iter()
            .rev()
            .zip(target.iter().rev())
            .all(|(d, t)| *d == Dim::Known(1) || d.compatible_with(*t));
    if fits {
        Ok(())
    } else {
        Err(TypeError::invalid(format_args!(
            "cannot broadcast {} to {}",
            DimList(data),
            DimList(target)
        )))
    }
}

struct DimList<'a>(&'a [Dim]);

impl std::fmt::Display for DimList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str(")")
    }
}

fn broadcast_to_rel(args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    let target = known_dims(static_shape_attr(attrs)?, "shape")?;
    check_broadcastable(&data.shape, &target)?;
    Ok(Type::Tensor(TensorType::new(target, data.dtype)))
}

fn dyn_broadcast_to_rel(args: &[Type], _attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    let rank = vector_param_len(args, 1, "shape")?;
    let target = any_dims(rank);
    check_broadcastable(&data.shape, &target)?;
    Ok(Type::Tensor(TensorType::new(target, data.dtype)))
}

fn broadcast_tensor(data: &Tensor, target: &[i64]) -> Result<KernelOutput, KernelError> {
    let target = to_shape(target, "shape")?;
    check_broadcastable(&shape_dims(data.shape()), &shape_dims(&target))
        .map_err(KernelError::invalid)?;
    let indices = broadcast_indices(data.shape(), &target);
    Ok(KernelOutput::Single(data.gather(&indices, &target)))
}

fn broadcast_to_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let target = static_shape_attr(attrs).map_err(KernelError::invalid)?;
    broadcast_tensor(&args[0], target)
}

fn dyn_broadcast_to_kernel(args: &[Tensor], _attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let target = vector_values(&args[1], "shape")?;
    broadcast_tensor(&args[0], target)
}

// === zeros / ones / full ===

fn init_attrs(attrs: &Attrs) -> Result<&InitOpAttrs, TypeError> {
    expect_attrs(attrs, "init", Attrs::as_init)
}

fn static_shape_attr(attrs: &Attrs) -> Result<&[i64], TypeError> {
    init_attrs(attrs)?
        .shape
        .as_deref()
        .ok_or_else(|| TypeError::invalid("missing shape attribute"))
}

fn init_rel(_args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    let shape = known_dims(static_shape_attr(attrs)?, "shape")?;
    Ok(Type::Tensor(TensorType::new(shape, init_attrs(attrs)?.dtype)))
}

fn full_rel(args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    scalar_param(args, 0, "fill_value")?;
    init_rel(args, attrs)
}

fn dyn_init_rel(args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    let rank = vector_param_len(args, 0, "shape")?;
    Ok(Type::Tensor(TensorType::new(any_dims(rank), init_attrs(attrs)?.dtype)))
}

fn dyn_full_rel(args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    scalar_param(args, 0, "fill_value")?;
    let rank = vector_param_len(args, 1, "shape")?;
    Ok(Type::Tensor(TensorType::new(any_dims(rank), init_attrs(attrs)?.dtype)))
}

fn static_init(attrs: &Attrs) -> Result<(Vec<usize>, DType), KernelError> {
    let shape = static_shape_attr(attrs).map_err(KernelError::invalid)?;
    let dtype = kernel_attrs(attrs, "init", Attrs::as_init)?.dtype;
    Ok((to_shape(shape, "shape")?, dtype))
}

fn dyn_init(shape: &Tensor, attrs: &Attrs) -> Result<(Vec<usize>, DType), KernelError> {
    let shape = to_shape(vector_values(shape, "shape")?, "shape")?;
    let dtype = kernel_attrs(attrs, "init", Attrs::as_init)?.dtype;
    Ok((shape, dtype))
}

fn fill_value(tensor: &Tensor) -> Result<f64, KernelError> {
    if tensor.num_elements() != 1 {
        return Err(KernelError::invalid(format_args!(
            "fill_value must hold one element, found {}",
            tensor.num_elements()
        )));
    }
    Ok(tensor.element_f64(0))
}

fn zeros_kernel(_args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let (shape, dtype) = static_init(attrs)?;
    Ok(KernelOutput::Single(Tensor::filled(dtype, &shape, 0.0)))
}

fn ones_kernel(_args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let (shape, dtype) = static_init(attrs)?;
    Ok(KernelOutput::Single(Tensor::filled(dtype, &shape, 1.0)))
}

fn full_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let (shape, dtype) = static_init(attrs)?;
    let value = fill_value(&args[0])?;
    Ok(KernelOutput::Single(Tensor::filled(dtype, &shape, value)))
}

fn dyn_zeros_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let (shape, dtype) = dyn_init(&args[0], attrs)?;
    Ok(KernelOutput::Single(Tensor::filled(dtype, &shape, 0.0)))
}

fn dyn_ones_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let (shape, dtype) = dyn_init(&args[0], attrs)?;
    Ok(KernelOutput::Single(Tensor::filled(dtype, &shape, 1.0)))
}

fn dyn_full_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let value = fill_value(&args[0])?;
    let (shape, dtype) = dyn_init(&args[1], attrs)?;
    Ok(KernelOutput::Single(Tensor::filled(dtype, &shape, value)))
}

// === shape_of / concatenate ===

fn shape_of_rel(args: &[Type], _attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    Ok(Type::tensor(&[data.rank()], DType::Int64))
}

fn shape_of_kernel(args: &[Tensor], _attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let dims: Vec<i64> = args[0].shape().iter().map(|&d| d as i64).collect();
    Ok(KernelOutput::Single(Tensor::vector_i64(&dims)))
}

fn concatenate_rel(args: &[Type], _attrs: &Attrs) -> Result<Type, TypeError> {
    let lhs = tensor_arg(args, 0, "lhs")?;
    let rhs = tensor_arg(args, 1, "rhs")?;
    if lhs.dtype != rhs.dtype {
        return Err(TypeError::mismatch(lhs.dtype, rhs.dtype));
    }
    match (lhs.shape.as_slice(), rhs.shape.as_slice()) {
        ([a], [b]) => {
            let len = match (a, b) {
                (Dim::Known(a), Dim::Known(b)) => Dim::Known(a + b),
                _ => Dim::Any,
            };
            Ok(Type::Tensor(TensorType::new([len], lhs.dtype)))
        }
        _ => Err(TypeError::invalid(format_args!(
            "operands must be rank 1, found {lhs} and {rhs}"
        ))),
    }
}

fn concatenate_kernel(args: &[Tensor], _attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let (lhs, rhs) = (&args[0], &args[1]);
    if lhs.ndim() != 1 || rhs.ndim() != 1 || lhs.dtype() != rhs.dtype() {
        return Err(KernelError::invalid(
            "operands must be rank-1 tensors of one dtype",
        ));
    }
    let data = match (lhs.data(), rhs.data()) {
        (TensorData::Int(a), TensorData::Int(b)) => TensorData::Int([&a[..], &b[..]].concat()),
        (TensorData::Float(a), TensorData::Float(b)) => {
            TensorData::Float([&a[..], &b[..]].concat())
        }
        _ => return Err(KernelError::invalid("operand storage differs")),
    };
    let len = lhs.num_elements() + rhs.num_elements();
    Ok(KernelOutput::Single(Tensor::new(lhs.dtype(), &[len], data)?))
}
