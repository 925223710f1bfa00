use serde::Serialize;

use super::state::SystemState;
use crate::encoder::NodeTensor;
use crate::tensor::{DType, KernelTensor, TensorContext};

/// Blend factor of previous activation against freshly sampled attention.
const ACTIVATION_RETENTION: f32 = 0.9;
const AWARENESS_DECAY: f32 = 0.8;
/// Feedback magnitude a level must exceed before its weights move.
pub const ADAPTATION_GATE: f32 = 0.1;

/// Width of the tensors at `level`: 100 at the base, shrinking by 20 per level
/// down to 10.
pub fn level_width(level: usize) -> usize {
    100usize.saturating_sub(20 * level).max(10)
}

/// One level of the meta-cognitive hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct MetaCognitiveTensor {
    pub id: String,
    pub meta_level: usize,
    pub convergence_threshold: f32,
    pub system_state: KernelTensor,
    /// `width × width`; row `i` tracks the attention of the `i`-th node.
    pub activation_patterns: KernelTensor,
    pub feedback_tensor: KernelTensor,
    pub self_monitoring: KernelTensor,
    /// `width × width`, clamped to `[-1, 1]`.
    pub adaptation_weights: KernelTensor,
}

impl MetaCognitiveTensor {
    pub fn new(ctx: &TensorContext, level: usize, base_threshold: f32) -> Self {
        let width = level_width(level);
        let vector = |kind: &str| ctx.create(&[width], DType::F32, Some(&format!("meta_{kind}_{level}")), true);
        let matrix =
            |kind: &str| ctx.create(&[width, width], DType::F32, Some(&format!("meta_{kind}_{level}")), true);
        Self {
            id: format!("meta_cognitive_{level}"),
            meta_level: level,
            convergence_threshold: base_threshold * (1.0 + 0.1 * level as f32),
            system_state: vector("state"),
            activation_patterns: matrix("activation"),
            feedback_tensor: vector("feedback"),
            self_monitoring: vector("monitoring"),
            adaptation_weights: matrix("adaptation"),
        }
    }

    pub fn width(&self) -> usize {
        self.system_state.len()
    }

    /// Fold one snapshot into every tensor of this level. `elapsed_secs` drives
    /// the reflective oscillation in the monitoring tail.
    pub fn observe(&mut self, state: &SystemState, nodes: &[NodeTensor], elapsed_secs: f32, damping: f32) {
        let level = self.meta_level;
        let width = self.width();

        for (slot, value) in [
            state.cognitive_load,
            state.reasoning_activity,
            state.memory_usage,
            state.processing_efficiency,
        ]
        .into_iter()
        .enumerate()
        {
            self.system_state.set(slot, value);
        }

        for (row, node) in nodes.iter().take(width).enumerate() {
            let sample = node.weight();
            let start = row * width;
            for cell in &mut self.activation_patterns.data[start..start + width] {
                *cell = *cell * ACTIVATION_RETENTION + sample * (1.0 - ACTIVATION_RETENTION);
            }
        }

        let awareness = AWARENESS_DECAY.powi(level as i32);
        let stable = if state.is_stable() { 1.0 } else { 0.0 };
        self.self_monitoring.set(0, state.cognitive_load * awareness);
        self.self_monitoring.set(1, state.processing_efficiency * awareness);
        self.self_monitoring.set(2, stable * awareness);
        for slot in 3..width.min(10) {
            let reflection = (elapsed_secs + slot as f32).sin() * 0.05 * awareness;
            let value = self.self_monitoring.get(slot) * 0.95 + reflection;
            self.self_monitoring.set(slot, value);
        }

        let level_scale = 1.0 - 0.1 * level as f32;
        let stability = if state.is_stable() { 1.0 } else { -0.5 };
        self.feedback_tensor.set(0, stability * level_scale);
        self.feedback_tensor.set(1, (state.processing_efficiency - 0.5) * level_scale);
        self.feedback_tensor.set(2, (0.5 - state.cognitive_load) * level_scale);
        self.feedback_tensor.data.iter_mut().for_each(|v| *v *= damping);
    }

    pub fn feedback_magnitude(&self) -> f32 {
        self.feedback_tensor.l2_norm()
    }

    /// Nudge adaptation weights along the feedback tensor, cycling it over the
    /// matrix. Returns the largest absolute change applied. Nothing moves while
    /// the feedback magnitude is at or below [`ADAPTATION_GATE`].
    pub fn adapt(&mut self, rate: f32, plasticity: f32) -> f32 {
        if self.feedback_magnitude() <= ADAPTATION_GATE {
            return 0.0;
        }
        let feedback = &self.feedback_tensor.data;
        let mut largest: f32 = 0.0;
        for (i, weight) in self.adaptation_weights.data.iter_mut().enumerate() {
            let before = *weight;
            let delta = feedback[i % feedback.len()] * rate * plasticity;
            *weight = (before + delta).clamp(-1.0, 1.0);
            largest = largest.max((*weight - before).abs());
        }
        largest
    }

    pub(crate) fn tensors(&self) -> [&KernelTensor; 5] {
        [
            &self.system_state,
            &self.activation_patterns,
            &self.feedback_tensor,
            &self.self_monitoring,
            &self.adaptation_weights,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::state::ConvergenceStatus;

    fn state(status: ConvergenceStatus, efficiency: f32) -> SystemState {
        SystemState {
            cognitive_load: 0.2,
            attention_distribution: Vec::new(),
            reasoning_activity: 0.5,
            memory_usage: 0.1,
            processing_efficiency: efficiency,
            convergence_status: status,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn widths_and_thresholds_shrink_with_level() {
        assert_eq!(level_width(0), 100);
        assert_eq!(level_width(2), 60);
        assert_eq!(level_width(5), 10);
        assert_eq!(level_width(9), 10);

        let ctx = TensorContext::with_seed(1);
        let t = MetaCognitiveTensor::new(&ctx, 2, 0.01);
        assert_eq!(t.activation_patterns.shape, vec![60, 60]);
        assert!((t.convergence_threshold - 0.012).abs() < 1e-6);
    }

    #[test]
    fn awareness_decays_geometrically() {
        let ctx = TensorContext::with_seed(1);
        let mut base = MetaCognitiveTensor::new(&ctx, 0, 0.01);
        let mut upper = MetaCognitiveTensor::new(&ctx, 2, 0.01);
        let s = state(ConvergenceStatus::Stable, 0.6);
        base.observe(&s, &[], 0.0, 0.9);
        upper.observe(&s, &[], 0.0, 0.9);
        assert!((base.self_monitoring.get(2) - 1.0).abs() < 1e-6);
        assert!((upper.self_monitoring.get(2) - 0.64).abs() < 1e-6);
        assert!((base.feedback_tensor.get(0) - 0.9).abs() < 1e-6);
    }

    #[test]
    fn adaptation_is_clamped() {
        let ctx = TensorContext::with_seed(1);
        let mut t = MetaCognitiveTensor::new(&ctx, 4, 0.01);
        t.observe(&state(ConvergenceStatus::Critical, 0.0), &[], 0.0, 1.0);
        for _ in 0..100 {
            t.adapt(10.0, 1.0);
        }
        assert!(t.adaptation_weights.data.iter().all(|w| (-1.0..=1.0).contains(w)));
        assert!(t.adaptation_weights.data.iter().any(|w| *w != 0.0));
    }

    #[test]
    fn weak_feedback_does_not_adapt() {
        let ctx = TensorContext::with_seed(1);
        let mut t = MetaCognitiveTensor::new(&ctx, 0, 0.01);
        assert_eq!(t.feedback_magnitude(), 0.0);
        assert_eq!(t.adapt(1.0, 1.0), 0.0);

        // Efficiency and load at 0.5 leave only the stability slot, damped to 0.09.
        let mut s = state(ConvergenceStatus::Stable, 0.5);
        s.cognitive_load = 0.5;
        t.observe(&s, &[], 0.0, 0.09);
        assert!(t.feedback_magnitude() <= ADAPTATION_GATE);
        assert_eq!(t.adapt(1.0, 1.0), 0.0);
        assert!(t.adaptation_weights.data.iter().all(|w| *w == 0.0));

        t.observe(&state(ConvergenceStatus::Critical, 0.0), &[], 0.0, 0.9);
        assert!(t.feedback_magnitude() > ADAPTATION_GATE);
        assert!(t.adapt(1.0, 1.0) > 0.0);
    }
}
