use std::fmt::{self, Display};

use ndarray::{ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};

use super::error::{TensorError, TensorResult};

/// Stable identity handed out by a [`TensorContext`](super::TensorContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TensorId(pub u64);

impl Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor_{}", self.0)
    }
}

/// Element type declared for a tensor.
///
/// Storage is always `f32`; the declared type only drives memory accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F16,
    I32,
    I16,
    I8,
}

impl DType {
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::I16 => 2,
            DType::I8 => 1,
        }
    }
}

impl Default for DType {
    fn default() -> Self {
        DType::F32
    }
}

/// Dense row-major tensor with shape metadata and an optional gradient buffer.
///
/// The gradient buffer, when present, always has the same number of elements
/// as `data`.
///
/// # Examples
///
/// ```
/// use cognitive_kernel_core::tensor::{DType, TensorContext};
///
/// let ctx = TensorContext::with_seed(7);
/// let t = ctx.create(&[2, 3], DType::F32, Some("weights"), true);
/// assert_eq!(t.shape, vec![2, 3]);
/// assert_eq!(t.gradient.as_ref().map(|g| g.len()), Some(6));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelTensor {
    pub id: TensorId,
    pub name: Option<String>,
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
    pub gradient: Option<Vec<f32>>,
}

impl KernelTensor {
    /// Number of elements implied by the shape.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len() * self.dtype.size_bytes()
    }

    pub fn tracks_gradient(&self) -> bool {
        self.gradient.is_some()
    }

    /// Element at a flat index, or zero when out of range.
    pub fn get(&self, index: usize) -> f32 {
        self.data.get(index).copied().unwrap_or(0.0)
    }

    /// Writes a flat element; out-of-range writes are ignored.
    pub fn set(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.data.get_mut(index) {
            *slot = value;
        }
    }

    pub fn l2_norm(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    /// Borrow the buffer as an n-dimensional view.
    pub fn view(&self) -> TensorResult<ArrayViewD<'_, f32>> {
        ArrayViewD::from_shape(IxDyn(&self.shape), &self.data).map_err(|_| TensorError::Layout {
            shape: self.shape.clone(),
            len: self.data.len(),
        })
    }

    /// Copy the buffer into an owned n-dimensional array.
    pub fn to_array(&self) -> TensorResult<ArrayD<f32>> {
        Ok(self.view()?.to_owned())
    }

    /// Zero the gradient buffer, allocating it if missing.
    pub fn zero_grad(&mut self) {
        match self.gradient.as_mut() {
            Some(grad) => grad.iter_mut().for_each(|g| *g = 0.0),
            None => self.gradient = Some(vec![0.0; self.data.len()]),
        }
    }
}

impl Display for KernelTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KernelTensor({}, name={:?}, shape={:?}, dtype={:?}, norm={:.4})",
            self.id,
            self.name,
            self.shape,
            self.dtype,
            self.l2_norm()
        )
    }
}
