//! Shape-checked primitive operations over [`KernelTensor`] buffers.
//!
//! These functions are pure: they read their operands and return a fresh
//! `ndarray` result. Identity and memory accounting are attached by
//! [`TensorContext`](super::TensorContext), which wraps each of them.
//!
//! - [`add`] - element-wise sum of equal shapes
//! - [`matmul`] - 2-D matrix product
//! - [`contract`] - multi-axis tensor contraction
//! - [`reshape`] - reinterpret with a new shape of equal size
//! - [`softmax`] - normalise along the last axis

use std::collections::HashSet;

use ndarray::{ArrayD, Axis, Ix2, IxDyn, Zip};

use super::error::{TensorError, TensorResult};
use super::kernel_tensor::KernelTensor;

fn layout_error(tensor: &KernelTensor) -> TensorError {
    TensorError::Layout {
        shape: tensor.shape.clone(),
        len: tensor.data.len(),
    }
}

/// Element-wise sum. Shapes must match exactly; there is no broadcasting.
pub fn add(a: &KernelTensor, b: &KernelTensor) -> TensorResult<ArrayD<f32>> {
    if a.shape != b.shape {
        return Err(TensorError::shape_mismatch("add", &a.shape, &b.shape));
    }
    let lhs = a.view()?;
    let rhs = b.view()?;
    let mut out = ArrayD::zeros(IxDyn(&a.shape));
    Zip::from(&mut out)
        .and(&lhs)
        .and(&rhs)
        .par_for_each(|out, &l, &r| *out = l + r);
    Ok(out)
}

/// Matrix product of `[m, k] x [k, n]`.
pub fn matmul(a: &KernelTensor, b: &KernelTensor) -> TensorResult<ArrayD<f32>> {
    if a.rank() != 2 || b.rank() != 2 || a.shape[1] != b.shape[0] {
        return Err(TensorError::shape_mismatch("matmul", &a.shape, &b.shape));
    }
    let lhs = a
        .view()?
        .into_dimensionality::<Ix2>()
        .map_err(|_| layout_error(a))?;
    let rhs = b
        .view()?
        .into_dimensionality::<Ix2>()
        .map_err(|_| layout_error(b))?;
    Ok(lhs.dot(&rhs).into_dyn())
}

/// Contract `a` and `b` over the given `(axis_of_a, axis_of_b)` pairs.
///
/// The result keeps the free axes of `a` followed by the free axes of `b`.
/// A full contraction yields shape `[1]`. An empty pair list is the outer
/// product.
pub fn contract(
    a: &KernelTensor,
    b: &KernelTensor,
    axis_pairs: &[(usize, usize)],
) -> TensorResult<ArrayD<f32>> {
    let mut seen_a = HashSet::new();
    let mut seen_b = HashSet::new();
    for &(axis_a, axis_b) in axis_pairs {
        if axis_a >= a.rank() || !seen_a.insert(axis_a) {
            return Err(TensorError::InvalidAxis {
                operation: "contract",
                axis: axis_a,
                rank: a.rank(),
            });
        }
        if axis_b >= b.rank() || !seen_b.insert(axis_b) {
            return Err(TensorError::InvalidAxis {
                operation: "contract",
                axis: axis_b,
                rank: b.rank(),
            });
        }
        if a.shape[axis_a] != b.shape[axis_b] {
            return Err(TensorError::shape_mismatch("contract", &a.shape, &b.shape));
        }
    }

    let free_a: Vec<usize> = (0..a.rank()).filter(|ax| !seen_a.contains(ax)).collect();
    let free_b: Vec<usize> = (0..b.rank()).filter(|ax| !seen_b.contains(ax)).collect();
    let contracted_a: Vec<usize> = axis_pairs.iter().map(|&(ax, _)| ax).collect();
    let contracted_b: Vec<usize> = axis_pairs.iter().map(|&(_, bx)| bx).collect();

    let m: usize = free_a.iter().map(|&ax| a.shape[ax]).product();
    let k: usize = contracted_a.iter().map(|&ax| a.shape[ax]).product();
    let n: usize = free_b.iter().map(|&ax| b.shape[ax]).product();

    let perm_a: Vec<usize> = free_a.iter().chain(contracted_a.iter()).copied().collect();
    let perm_b: Vec<usize> = contracted_b.iter().chain(free_b.iter()).copied().collect();

    let lhs = a
        .view()?
        .permuted_axes(IxDyn(&perm_a))
        .as_standard_layout()
        .into_owned()
        .into_shape((m, k))
        .map_err(|_| layout_error(a))?;
    let rhs = b
        .view()?
        .permuted_axes(IxDyn(&perm_b))
        .as_standard_layout()
        .into_owned()
        .into_shape((k, n))
        .map_err(|_| layout_error(b))?;

    let mut out_shape: Vec<usize> = free_a
        .iter()
        .map(|&ax| a.shape[ax])
        .chain(free_b.iter().map(|&bx| b.shape[bx]))
        .collect();
    if out_shape.is_empty() {
        out_shape.push(1);
    }

    lhs.dot(&rhs)
        .into_shape(IxDyn(&out_shape))
        .map_err(|_| TensorError::shape_mismatch("contract", &a.shape, &b.shape))
}

/// Reinterpret the buffer under a new shape with the same element count.
pub fn reshape(tensor: &KernelTensor, shape: &[usize]) -> TensorResult<ArrayD<f32>> {
    let target: usize = shape.iter().product();
    if target != tensor.numel() {
        return Err(TensorError::shape_mismatch("reshape", &tensor.shape, shape));
    }
    tensor
        .to_array()?
        .into_shape(IxDyn(shape))
        .map_err(|_| TensorError::shape_mismatch("reshape", &tensor.shape, shape))
}

/// Numerically stable softmax over the last axis.
///
/// Every lane along the last axis sums to one. Scalars and rank-0 inputs are
/// treated as a single lane.
pub fn softmax(tensor: &KernelTensor) -> TensorResult<ArrayD<f32>> {
    let mut out = tensor.to_array()?;
    if out.ndim() == 0 {
        out.fill(1.0);
        return Ok(out);
    }
    let last = Axis(out.ndim() - 1);
    for mut lane in out.lanes_mut(last) {
        let max = lane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        lane.mapv_inplace(|v| (v - max).exp());
        let sum: f32 = lane.sum();
        if sum > 0.0 && sum.is_finite() {
            lane.mapv_inplace(|v| v / sum);
        }
    }
    Ok(out)
}

/// Multiply every element by `factor`.
pub fn scale(tensor: &KernelTensor, factor: f32) -> TensorResult<ArrayD<f32>> {
    let mut out = tensor.to_array()?;
    out.par_mapv_inplace(|v| v * factor);
    Ok(out)
}

/// Softmax of a plain slice, used where no tensor identity is needed.
pub fn softmax_slice(values: &[f32]) -> Vec<f32> {
    if values.is_empty() {
        return Vec::new();
    }
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.into_iter().map(|e| e / sum).collect()
    } else {
        vec![1.0 / values.len() as f32; values.len()]
    }
}
