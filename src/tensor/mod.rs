pub mod context;
pub mod error;
pub mod gradient;
pub mod kernel_tensor;
pub mod operations;

pub use context::{MemoryStats, TensorContext, DEFAULT_MAX_MEMORY};
pub use error::{TensorError, TensorResult};
pub use kernel_tensor::{DType, KernelTensor, TensorId};
