//! Memory-accounted tensor context.
//!
//! A [`TensorContext`] is the single allocator every tensor in one kernel goes
//! through. It hands out identities, tracks the bytes held by live tensors and
//! owns the seeded random generator used for initialisation. The handle is
//! cheap to clone; clones share the same accounting store, so the encoder and
//! the reasoning engine of one kernel see one memory budget while two kernels
//! in the same process stay fully independent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::error::{TensorError, TensorResult};
use super::kernel_tensor::{DType, KernelTensor, TensorId};
use super::operations;

/// Default accounting capacity: 1 GiB.
pub const DEFAULT_MAX_MEMORY: usize = 1024 * 1024 * 1024;

/// Snapshot of the context's memory accounting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemoryStats {
    pub used_bytes: usize,
    pub total_bytes: usize,
    /// Percentage of capacity in use (0-100).
    pub percentage: f32,
    pub live_tensors: usize,
}

impl MemoryStats {
    /// Usage as a fraction of capacity in `[0, 1]`.
    pub fn fraction(&self) -> f32 {
        (self.percentage / 100.0).clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
struct ContextState {
    next_id: u64,
    live: HashMap<TensorId, usize>,
    memory_usage: usize,
    max_memory: usize,
    operations: u64,
    rng: StdRng,
}

/// Shared handle to one tensor accounting store.
#[derive(Debug, Clone)]
pub struct TensorContext {
    inner: Arc<Mutex<ContextState>>,
}

impl TensorContext {
    pub fn new(max_memory: usize, seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContextState {
                next_id: 1,
                live: HashMap::new(),
                memory_usage: 0,
                max_memory: max_memory.max(1),
                operations: 0,
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::new(DEFAULT_MAX_MEMORY, seed)
    }

    fn state(&self) -> MutexGuard<'_, ContextState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn allocate(
        &self,
        shape: Vec<usize>,
        data: Vec<f32>,
        dtype: DType,
        name: Option<&str>,
        track_gradient: bool,
    ) -> KernelTensor {
        let mut state = self.state();
        let id = TensorId(state.next_id);
        state.next_id += 1;

        let gradient = track_gradient.then(|| vec![0.0; data.len()]);
        let tensor = KernelTensor {
            id,
            name: name.map(str::to_string),
            dtype,
            shape,
            data,
            gradient,
        };
        let bytes = tensor.size_bytes();
        state.live.insert(id, bytes);
        state.memory_usage += bytes;
        tensor
    }

    /// Zero-initialised tensor.
    pub fn create(
        &self,
        shape: &[usize],
        dtype: DType,
        name: Option<&str>,
        track_gradient: bool,
    ) -> KernelTensor {
        let numel = shape.iter().product();
        self.allocate(shape.to_vec(), vec![0.0; numel], dtype, name, track_gradient)
    }

    /// Xavier/Glorot-uniform initialised `f32` tensor drawn from the context RNG.
    pub fn create_random(
        &self,
        shape: &[usize],
        name: Option<&str>,
        track_gradient: bool,
    ) -> KernelTensor {
        let numel: usize = shape.iter().product();
        let fan_in = shape.first().copied().unwrap_or(1);
        let fan_out = shape.get(1).copied().unwrap_or(1);
        let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();

        let data = {
            let mut state = self.state();
            (0..numel)
                .map(|_| state.rng.gen_range(-limit..=limit))
                .collect::<Vec<f32>>()
        };
        self.allocate(shape.to_vec(), data, DType::F32, name, track_gradient)
    }

    /// Wrap an existing buffer; fails when the buffer does not fill `shape`.
    pub fn from_vec(
        &self,
        shape: &[usize],
        data: Vec<f32>,
        name: Option<&str>,
        track_gradient: bool,
    ) -> TensorResult<KernelTensor> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(TensorError::Layout {
                shape: shape.to_vec(),
                len: data.len(),
            });
        }
        Ok(self.allocate(shape.to_vec(), data, DType::F32, name, track_gradient))
    }

    fn register(&self, array: ArrayD<f32>, track_gradient: bool) -> KernelTensor {
        let shape = array.shape().to_vec();
        let data = if array.is_standard_layout() {
            array.into_raw_vec()
        } else {
            array.iter().copied().collect()
        };
        self.state().operations += 1;
        self.allocate(shape, data, DType::F32, None, track_gradient)
    }

    /// Deep copy under a fresh identity.
    pub fn clone_tensor(&self, tensor: &KernelTensor) -> KernelTensor {
        let mut copy = self.allocate(
            tensor.shape.clone(),
            tensor.data.clone(),
            tensor.dtype,
            tensor.name.as_deref(),
            false,
        );
        copy.gradient = tensor.gradient.clone();
        copy
    }

    pub fn add(&self, a: &KernelTensor, b: &KernelTensor) -> TensorResult<KernelTensor> {
        let out = operations::add(a, b)?;
        Ok(self.register(out, a.tracks_gradient() || b.tracks_gradient()))
    }

    pub fn matmul(&self, a: &KernelTensor, b: &KernelTensor) -> TensorResult<KernelTensor> {
        let out = operations::matmul(a, b)?;
        Ok(self.register(out, a.tracks_gradient() || b.tracks_gradient()))
    }

    pub fn contract(
        &self,
        a: &KernelTensor,
        b: &KernelTensor,
        axis_pairs: &[(usize, usize)],
    ) -> TensorResult<KernelTensor> {
        let out = operations::contract(a, b, axis_pairs)?;
        Ok(self.register(out, a.tracks_gradient() || b.tracks_gradient()))
    }

    pub fn reshape(&self, tensor: &KernelTensor, shape: &[usize]) -> TensorResult<KernelTensor> {
        let out = operations::reshape(tensor, shape)?;
        Ok(self.register(out, tensor.tracks_gradient()))
    }

    pub fn softmax(&self, tensor: &KernelTensor) -> TensorResult<KernelTensor> {
        let out = operations::softmax(tensor)?;
        Ok(self.register(out, tensor.tracks_gradient()))
    }

    pub fn scale(&self, tensor: &KernelTensor, factor: f32) -> TensorResult<KernelTensor> {
        let out = operations::scale(tensor, factor)?;
        Ok(self.register(out, tensor.tracks_gradient()))
    }

    /// Return a tensor's bytes to the pool. Returns `false` if it was not live.
    pub fn release(&self, tensor: &KernelTensor) -> bool {
        self.release_id(tensor.id)
    }

    pub fn release_id(&self, id: TensorId) -> bool {
        let mut state = self.state();
        match state.live.remove(&id) {
            Some(bytes) => {
                state.memory_usage = state.memory_usage.saturating_sub(bytes);
                true
            }
            None => false,
        }
    }

    pub fn is_live(&self, id: TensorId) -> bool {
        self.state().live.contains_key(&id)
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let state = self.state();
        MemoryStats {
            used_bytes: state.memory_usage,
            total_bytes: state.max_memory,
            percentage: state.memory_usage as f32 / state.max_memory as f32 * 100.0,
            live_tensors: state.live.len(),
        }
    }

    pub fn set_max_memory(&self, bytes: usize) {
        self.state().max_memory = bytes.max(1);
    }

    /// Count of tensor-producing operations run through this context.
    pub fn operation_count(&self) -> u64 {
        self.state().operations
    }

    /// Run `f` with exclusive access to the context RNG.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        f(&mut self.state().rng)
    }

    /// Forget every live tensor. Identities keep increasing across resets.
    pub fn reset(&self) {
        let mut state = self.state();
        state.live.clear();
        state.memory_usage = 0;
        state.operations = 0;
    }
}

impl Default for TensorContext {
    fn default() -> Self {
        Self::with_seed(42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounting_tracks_create_and_release() {
        let ctx = TensorContext::with_seed(1);
        let a = ctx.create(&[4, 4], DType::F32, None, false);
        let b = ctx.create(&[8], DType::I8, Some("bytes"), false);
        let stats = ctx.memory_stats();
        assert_eq!(stats.used_bytes, 16 * 4 + 8);
        assert_eq!(stats.live_tensors, 2);

        assert!(ctx.release(&a));
        assert!(!ctx.release(&a));
        assert_eq!(ctx.memory_stats().used_bytes, 8);
        assert!(ctx.is_live(b.id));
    }

    #[test]
    fn identities_are_unique() {
        let ctx = TensorContext::with_seed(1);
        let a = ctx.create(&[1], DType::F32, None, false);
        let b = ctx.clone_tensor(&a);
        assert_ne!(a.id, b.id);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn random_tensors_are_seeded() {
        let a = TensorContext::with_seed(9).create_random(&[16], None, false);
        let b = TensorContext::with_seed(9).create_random(&[16], None, false);
        assert_eq!(a.data, b.data);
        let limit = (6.0f32 / 17.0).sqrt();
        assert!(a.data.iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn from_vec_rejects_short_buffer() {
        let ctx = TensorContext::default();
        let err = ctx.from_vec(&[2, 2], vec![1.0; 3], None, false).unwrap_err();
        assert!(matches!(err, TensorError::Layout { len: 3, .. }));
    }

    #[test]
    fn independent_contexts_do_not_share_accounting() {
        let a = TensorContext::with_seed(1);
        let b = TensorContext::with_seed(1);
        a.create(&[100], DType::F32, None, false);
        assert_eq!(b.memory_stats().used_bytes, 0);
        let shared = a.clone();
        assert_eq!(shared.memory_stats().used_bytes, 400);
    }
}
