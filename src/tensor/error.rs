//! Error types for tensor primitives.

use thiserror::Error;

/// Result alias for tensor operations.
pub type TensorResult<T> = Result<T, TensorError>;

/// Failures raised by tensor primitives.
///
/// Shape mismatches are always fatal to the operation that raised them and are
/// propagated to the caller unchanged; nothing in this layer coerces shapes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    /// Operand shapes are incompatible for the requested operation.
    #[error("shape mismatch in {operation}: {left:?} vs {right:?}")]
    ShapeMismatch {
        operation: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    /// A contraction referenced an axis outside the operand rank, or reused one.
    #[error("invalid axis {axis} for rank-{rank} operand in {operation}")]
    InvalidAxis {
        operation: &'static str,
        axis: usize,
        rank: usize,
    },

    /// The backing buffer length disagrees with the declared shape.
    #[error("buffer of {len} elements cannot hold shape {shape:?}")]
    Layout { shape: Vec<usize>, len: usize },
}

impl TensorError {
    pub(crate) fn shape_mismatch(operation: &'static str, left: &[usize], right: &[usize]) -> Self {
        TensorError::ShapeMismatch {
            operation,
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}
