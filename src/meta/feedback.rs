use rand::Rng;
use serde::Serialize;

use super::state::SystemState;
use crate::tensor::{DType, KernelTensor, TensorContext};

pub const FEEDBACK_WIDTH: usize = 20;
const STABILITY_SMOOTHING: f32 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Attention,
    Reasoning,
    Encoding,
    Memory,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Attention,
        Component::Reasoning,
        Component::Encoding,
        Component::Memory,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Component::Attention => "attention",
            Component::Reasoning => "reasoning",
            Component::Encoding => "encoding",
            Component::Memory => "memory",
        }
    }

    /// Raw signal this component emits for a snapshot.
    pub fn signal(self, state: &SystemState) -> f32 {
        match self {
            Component::Attention => state.mean_attention(),
            Component::Reasoning => state.reasoning_activity,
            Component::Encoding => 1.0 - state.cognitive_load,
            Component::Memory => 1.0 - state.memory_usage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopType {
    Positive,
    Negative,
    Oscillatory,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackLoop {
    pub id: String,
    pub source: Component,
    pub target: Component,
    pub feedback_tensor: KernelTensor,
    pub feedback_strength: f32,
    pub loop_type: LoopType,
    pub stability_measure: f32,
    last_signal: Option<f32>,
}

impl FeedbackLoop {
    pub fn new(ctx: &TensorContext, source: Component, target: Component) -> Self {
        let id = format!("{}_to_{}", source.as_str(), target.as_str());
        let feedback_tensor = ctx.create(&[FEEDBACK_WIDTH], DType::F32, Some(&format!("feedback_{id}")), true);
        let (feedback_strength, loop_type, stability_measure) = ctx.with_rng(|rng| {
            let strength = 0.1 + rng.gen::<f32>() * 0.3;
            let roll: f32 = rng.gen();
            let loop_type = if roll < 0.6 {
                LoopType::Positive
            } else if roll < 0.9 {
                LoopType::Negative
            } else {
                LoopType::Oscillatory
            };
            (strength, loop_type, 0.8 + rng.gen::<f32>() * 0.2)
        });
        Self {
            id,
            source,
            target,
            feedback_tensor,
            feedback_strength,
            loop_type,
            stability_measure,
            last_signal: None,
        }
    }

    /// One loop per ordered pair of distinct components.
    pub fn all(ctx: &TensorContext) -> Vec<Self> {
        Component::ALL
            .iter()
            .flat_map(|&source| {
                Component::ALL
                    .iter()
                    .filter(move |&&target| target != source)
                    .map(move |&target| (source, target))
            })
            .map(|(source, target)| FeedbackLoop::new(ctx, source, target))
            .collect()
    }

    /// Signal after the loop's polarity is applied.
    pub fn shaped_signal(&self, state: &SystemState, elapsed_secs: f32) -> f32 {
        let raw = self.source.signal(state);
        match self.loop_type {
            LoopType::Positive => raw,
            LoopType::Negative => -raw,
            LoopType::Oscillatory => raw * elapsed_secs.sin(),
        }
    }

    /// Blend the shaped signal into the tensor and update stability. Each cell
    /// keeps `damping` of its value and takes the rest from the input.
    pub fn propagate(&mut self, state: &SystemState, elapsed_secs: f32, damping: f32) -> f32 {
        let signal = self.shaped_signal(state, elapsed_secs);
        let input = signal * self.feedback_strength;
        for value in self.feedback_tensor.data.iter_mut() {
            *value = *value * damping + input * (1.0 - damping);
        }

        let change = self.last_signal.map_or(0.0, |last| (signal - last).abs());
        self.stability_measure = (self.stability_measure * STABILITY_SMOOTHING
            + (1.0 - change) * (1.0 - STABILITY_SMOOTHING))
            .clamp(0.0, 1.0);
        self.last_signal = Some(signal);
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetaConfig;
    use crate::meta::state::ConvergenceStatus;

    fn state(memory: f32) -> SystemState {
        SystemState {
            cognitive_load: 0.25,
            attention_distribution: vec![0.5, 1.5],
            reasoning_activity: 0.75,
            memory_usage: memory,
            processing_efficiency: 0.5,
            convergence_status: ConvergenceStatus::Stable,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn twelve_distinct_loops() {
        let ctx = TensorContext::with_seed(9);
        let loops = FeedbackLoop::all(&ctx);
        assert_eq!(loops.len(), 12);
        assert!(loops.iter().all(|l| l.source != l.target));
        assert!(loops.iter().any(|l| l.id == "memory_to_attention"));
        assert!(loops
            .iter()
            .all(|l| (0.1..=0.4).contains(&l.feedback_strength)));
    }

    #[test]
    fn component_signals() {
        let s = state(0.2);
        assert_eq!(Component::Attention.signal(&s), 1.0);
        assert_eq!(Component::Reasoning.signal(&s), 0.75);
        assert_eq!(Component::Encoding.signal(&s), 0.75);
        assert!((Component::Memory.signal(&s) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn negative_loop_inverts_and_stability_stays_in_range() {
        let ctx = TensorContext::with_seed(9);
        let mut feedback = FeedbackLoop::new(&ctx, Component::Memory, Component::Attention);
        feedback.loop_type = LoopType::Negative;
        let signal = feedback.propagate(&state(0.2), 0.0, 0.9);
        assert!((signal + 0.8).abs() < 1e-6);
        assert!(feedback.feedback_tensor.get(0) < 0.0);

        for i in 0..50 {
            let memory = if i % 2 == 0 { 0.0 } else { 1.0 };
            feedback.propagate(&state(memory), i as f32, 0.9);
        }
        assert!((0.0..=1.0).contains(&feedback.stability_measure));
    }

    #[test]
    fn default_damping_keeps_ninety_percent() {
        let damping = MetaConfig::default().feedback_damping;
        assert_eq!(damping, 0.9);

        let ctx = TensorContext::with_seed(9);
        let mut feedback = FeedbackLoop::new(&ctx, Component::Memory, Component::Reasoning);
        feedback.loop_type = LoopType::Positive;
        let strength = feedback.feedback_strength;

        feedback.propagate(&state(0.2), 0.0, damping);
        let first = 0.1 * 0.8 * strength;
        assert!(feedback.feedback_tensor.data.iter().all(|v| (v - first).abs() < 1e-6));

        feedback.propagate(&state(0.2), 0.0, damping);
        let second = first * 0.9 + 0.1 * 0.8 * strength;
        assert!(feedback.feedback_tensor.data.iter().all(|v| (v - second).abs() < 1e-6));
    }
}
