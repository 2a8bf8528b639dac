//! Selection operators.

use std::cmp::Ordering;

use super::*;
use crate::attrs::{TopKAttrs, TopKReturn};
use crate::op::{KernelOutput, OpDef};
use crate::tensor::TensorData;
use crate::DType;

pub(super) fn register(registry: &mut OpRegistry) {
    registry.register(OpDef::new(TOPK, 1, topk_rel).with_kernel(topk_kernel));
    registry.register(OpDef::new(DYN_TOPK, 2, dyn_topk_rel).with_kernel(dyn_topk_kernel));
}

fn topk_attrs(attrs: &Attrs) -> Result<&TopKAttrs, TypeError> {
    expect_attrs(attrs, "topk", Attrs::as_topk)
}

/// Result type of a top-k selection producing `selected` elements along
/// the axis.
fn topk_type(data: &TensorType, attrs: &TopKAttrs, selected: Dim) -> Result<Type, TypeError> {
    if !attrs.dtype.is_int() {
        return Err(TypeError::invalid(format_args!(
            "index dtype must be an integer type, found {}",
            attrs.dtype
        )));
    }
    let axis = normalize_axis(attrs.axis, data.rank()).ok_or_else(|| {
        TypeError::invalid(format_args!(
            "axis {} is out of range for rank {}",
            attrs.axis,
            data.rank()
        ))
    })?;
    let mut shape = data.shape.clone();
    shape[axis] = selected;
    let values = Type::Tensor(TensorType::new(shape.clone(), data.dtype));
    let indices = Type::Tensor(TensorType::new(shape, attrs.dtype));
    Ok(match attrs.ret_type {
        TopKReturn::Both => Type::Tuple(vec![values, indices]),
        TopKReturn::Values => values,
        TopKReturn::Indices => indices,
    })
}

/// Number of selected elements: `k` below 1 selects the whole axis, and
/// `k` is clamped to the axis length.
fn selected_count(k: i64, axis_len: usize) -> usize {
    match usize::try_from(k) {
        Ok(k) if k >= 1 => k.min(axis_len),
        _ => axis_len,
    }
}

fn topk_rel(args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    let attrs = topk_attrs(attrs)?;
    let k = attrs
        .k
        .ok_or_else(|| TypeError::invalid("missing k attribute"))?;
    let axis = normalize_axis(attrs.axis, data.rank()).unwrap_or(0);
    let selected = match data.shape.get(axis).copied() {
        Some(Dim::Known(len)) => Dim::Known(selected_count(k, len)),
        _ => Dim::Any,
    };
    topk_type(data, attrs, selected)
}

fn dyn_topk_rel(args: &[Type], attrs: &Attrs) -> Result<Type, TypeError> {
    let data = tensor_arg(args, 0, "data")?;
    scalar_param(args, 1, "k")?;
    topk_type(data, topk_attrs(attrs)?, Dim::Any)
}

fn topk_tensor(data: &Tensor, k: i64, attrs: &TopKAttrs) -> Result<KernelOutput, KernelError> {
    let axis = normalize_axis(attrs.axis, data.ndim()).ok_or_else(|| {
        KernelError::invalid(format_args!(
            "axis {} is out of range for rank {}",
            attrs.axis,
            data.ndim()
        ))
    })?;
    let shape = data.shape();
    let axis_len = shape[axis];
    let selected = selected_count(k, axis_len);
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();

    let mut out_shape = shape.to_vec();
    out_shape[axis] = selected;

    let compare = |a: usize, b: usize| -> Ordering {
        let ord = match data.data() {
            TensorData::Int(v) => v[a].cmp(&v[b]),
            TensorData::Float(v) => v[a].total_cmp(&v[b]),
        };
        if attrs.is_ascend { ord } else { ord.reverse() }
    };

    // Output is laid out like the input with the axis shortened, so walk
    // (outer, selected, inner) in row-major order.
    let mut gathered = vec![0; outer * selected * inner];
    let mut positions = vec![0; outer * selected * inner];
    let mut order: Vec<usize> = Vec::with_capacity(axis_len);
    for o in 0..outer {
        for i in 0..inner {
            let base = o * axis_len * inner + i;
            order.clear();
            order.extend((0..axis_len).map(|j| base + j * inner));
            // Stable, so ties keep their original order.
            order.sort_by(|&a, &b| compare(a, b));
            for (rank, &flat) in order.iter().take(selected).enumerate() {
                let out = (o * selected + rank) * inner + i;
                gathered[out] = flat;
                positions[out] = ((flat - base) / inner) as i64;
            }
        }
    }

    let values = data.gather(&gathered, &out_shape);
    let indices = Tensor::from_i64(attrs.dtype, &out_shape, positions)?;
    Ok(match attrs.ret_type {
        TopKReturn::Both => KernelOutput::Tuple(vec![values, indices]),
        TopKReturn::Values => KernelOutput::Single(values),
        TopKReturn::Indices => KernelOutput::Single(indices),
    })
}

fn topk_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let attrs = kernel_attrs(attrs, "topk", Attrs::as_topk)?;
    let k = attrs
        .k
        .ok_or_else(|| KernelError::invalid("missing k attribute"))?;
    topk_tensor(&args[0], k, attrs)
}

fn dyn_topk_kernel(args: &[Tensor], attrs: &Attrs) -> Result<KernelOutput, KernelError> {
    let attrs = kernel_attrs(attrs, "topk", Attrs::as_topk)?;
    let k = &args[1];
    if k.ndim() != 0 {
        return Err(KernelError::invalid(format_args!(
            "k must be a scalar, found rank {}",
            k.ndim()
        )));
    }
    let k = int_values(k, "k")?
        .first()
        .copied()
        .ok_or_else(|| KernelError::invalid("k holds no value"))?;
    topk_tensor(&args[0], k, attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(k: Option<i64>, ret_type: TopKReturn, is_ascend: bool) -> TopKAttrs {
        TopKAttrs {
            k,
            ret_type,
            is_ascend,
            ..TopKAttrs::default()
        }
    }

    #[test]
    fn selects_largest_along_last_axis() {
        let data = Tensor::from_f64(DType::Float32, &[2, 3], vec![1.0, 3.0, 2.0, 6.0, 4.0, 5.0])
            .unwrap();
        let out = topk_tensor(&data, 2, &attrs(Some(2), TopKReturn::Both, false)).unwrap();
        let KernelOutput::Tuple(parts) = out else {
            panic!("expected values and indices");
        };
        assert_eq!(parts[0].shape(), &[2, 2]);
        let values = Tensor::from_f64(DType::Float32, &[2, 2], vec![3.0, 2.0, 6.0, 5.0]).unwrap();
        assert_eq!(parts[0], values);
        assert_eq!(parts[1], Tensor::from_i64(DType::Int32, &[2, 2], vec![1, 2, 0, 2]).unwrap());
    }

    #[test]
    fn ascending_ties_keep_input_order() {
        let data = Tensor::from_i64(DType::Int64, &[4], vec![2, 1, 2, 1]).unwrap();
        let out = topk_tensor(&data, 0, &attrs(Some(0), TopKReturn::Indices, true)).unwrap();
        assert_eq!(
            out,
            KernelOutput::Single(Tensor::from_i64(DType::Int32, &[4], vec![1, 3, 0, 2]).unwrap())
        );
    }

    #[test]
    fn selects_along_leading_axis() {
        let data = Tensor::from_i64(DType::Int64, &[3, 2], vec![1, 9, 5, 7, 3, 8]).unwrap();
        let topk = TopKAttrs {
            k: Some(1),
            axis: 0,
            ret_type: TopKReturn::Values,
            ..TopKAttrs::default()
        };
        let out = topk_tensor(&data, 1, &topk).unwrap();
        assert_eq!(
            out,
            KernelOutput::Single(Tensor::from_i64(DType::Int64, &[1, 2], vec![5, 9]).unwrap())
        );
    }

    #[test]
    fn relation_clamps_k_and_builds_tuple() {
        let args = [Type::tensor(&[2, 3], DType::Float32)];
        let ty = topk_rel(&args, &Attrs::from(attrs(Some(5), TopKReturn::Both, false))).unwrap();
        assert_eq!(
            ty.to_string(),
            "(Tensor[(2, 3), float32], Tensor[(2, 3), int32])"
        );

        let dyn_args = [Type::tensor(&[2, 3], DType::Float32), Type::tensor(&[], DType::Int64)];
        let ty = dyn_topk_rel(&dyn_args, &Attrs::from(attrs(None, TopKReturn::Values, false)))
            .unwrap();
        assert_eq!(ty.to_string(), "Tensor[(2, ?), float32]");
    }

    #[test]
    fn dynamic_kernel_reads_k_from_a_scalar() {
        let data = Tensor::from_i64(DType::Int64, &[3], vec![4, 9, 1]).unwrap();
        let topk = Attrs::from(attrs(None, TopKReturn::Values, false));

        let out = dyn_topk_kernel(&[data.clone(), Tensor::scalar_i64(1)], &topk).unwrap();
        assert_eq!(
            out,
            KernelOutput::Single(Tensor::from_i64(DType::Int64, &[1], vec![9]).unwrap())
        );

        let vector = Tensor::vector_i64(&[1]);
        assert!(dyn_topk_kernel(&[data.clone(), vector], &topk).is_err());
        let float = Tensor::from_f64(DType::Float32, &[], vec![1.0]).unwrap();
        assert!(dyn_topk_kernel(&[data, float], &topk).is_err());
    }
}
