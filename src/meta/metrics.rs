use serde::Serialize;

use super::state::{ConvergenceStatus, SystemState};

/// Snapshots aggregated into one metrics report.
pub const METRICS_WINDOW: usize = 10;
/// Window for the self-modification frequency, in milliseconds.
pub const MODIFICATION_WINDOW_MS: u128 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetaCognitiveMetrics {
    /// Fraction of recent snapshots that were stable.
    pub self_awareness_level: f32,
    /// Mean effective adaptation rate over recent updates.
    pub adaptation_rate: f32,
    /// Mean processing efficiency over recent snapshots.
    pub system_coherence: f32,
    pub meta_attention_efficiency: f32,
    pub feedback_loop_stability: f32,
    /// Modifications per second over the last minute.
    pub self_modification_frequency: f32,
    pub convergence_rate: f32,
    /// Status of the latest snapshot, if any.
    pub convergence_status: Option<ConvergenceStatus>,
}

impl MetaCognitiveMetrics {
    pub(crate) fn aggregate<'a>(
        recent: impl Iterator<Item = &'a SystemState>,
        adaptation_rates: &[f32],
        loop_stability: &[f32],
        recent_modifications: usize,
        meta_attention_allocation: f32,
    ) -> Self {
        let states: Vec<&SystemState> = recent.collect();
        let Some(latest) = states.last() else {
            return Self::default();
        };

        let count = states.len() as f32;
        let stable = states.iter().filter(|s| s.is_stable()).count() as f32 / count;
        Self {
            self_awareness_level: stable,
            adaptation_rate: mean(adaptation_rates),
            system_coherence: states.iter().map(|s| s.processing_efficiency).sum::<f32>() / count,
            meta_attention_efficiency: meta_attention_allocation,
            feedback_loop_stability: mean(loop_stability),
            self_modification_frequency: recent_modifications as f32 / 60.0,
            convergence_rate: stable,
            convergence_status: Some(latest.convergence_status),
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}
