//! System-state snapshots and their rolling history.

use std::collections::VecDeque;

use serde::Serialize;

use crate::attention::AttentionStats;
use crate::encoder::{LinkTensor, NodeTensor};
use crate::logging::timestamp_ms;
use crate::reasoning::ReasoningStats;

/// Nodes plus links that count as full cognitive load.
const LOAD_CAPACITY: f32 = 1000.0;
/// Gradient norm that counts as non-converged.
const GRADIENT_THRESHOLD: f32 = 0.1;
/// Ratio over the previous gradient norm that marks a diverging trend.
pub const DIVERGENCE_GROWTH: f32 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    Stable,
    Adapting,
    Diverging,
    Critical,
}

impl ConvergenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConvergenceStatus::Stable => "stable",
            ConvergenceStatus::Adapting => "adapting",
            ConvergenceStatus::Diverging => "diverging",
            ConvergenceStatus::Critical => "critical",
        }
    }

    /// Critical wins over adapting, which wins over stable.
    pub fn classify(
        memory_usage: f32,
        cognitive_load: f32,
        gradient_norm: f32,
        reasoning: &ReasoningStats,
    ) -> Self {
        if memory_usage > 0.9 || cognitive_load > 0.8 {
            ConvergenceStatus::Critical
        } else if gradient_norm > GRADIENT_THRESHOLD
            || (reasoning.total_chains > 0 && reasoning.average_confidence < 0.5)
        {
            ConvergenceStatus::Adapting
        } else {
            ConvergenceStatus::Stable
        }
    }

    /// Escalate `Adapting` to `Diverging` when the attention gradient grew by
    /// more than [`DIVERGENCE_GROWTH`] since the previous snapshot. Any other
    /// status is returned unchanged.
    pub fn with_gradient_trend(self, previous: Option<f32>, current: f32) -> Self {
        match (self, previous) {
            (ConvergenceStatus::Adapting, Some(previous))
                if current > GRADIENT_THRESHOLD && current > previous * DIVERGENCE_GROWTH =>
            {
                ConvergenceStatus::Diverging
            }
            (status, _) => status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemState {
    /// `(nodes + links) / 1000`.
    pub cognitive_load: f32,
    /// Current attention weight per node, in encoder order.
    pub attention_distribution: Vec<f32>,
    /// Fraction of retained chains still active.
    pub reasoning_activity: f32,
    /// Fraction of tensor memory capacity in use.
    pub memory_usage: f32,
    /// Mean of attention utilisation and reasoning throughput.
    pub processing_efficiency: f32,
    pub convergence_status: ConvergenceStatus,
    pub timestamp_ms: u128,
}

impl SystemState {
    pub fn snapshot(
        nodes: &[NodeTensor],
        links: &[LinkTensor],
        attention: &AttentionStats,
        reasoning: &ReasoningStats,
        memory_usage: f32,
    ) -> Self {
        let cognitive_load = (nodes.len() + links.len()) as f32 / LOAD_CAPACITY;
        let memory_usage = sanitize_scalar(memory_usage);
        Self {
            cognitive_load,
            attention_distribution: nodes.iter().map(NodeTensor::weight).collect(),
            reasoning_activity: reasoning.active_chains as f32 / reasoning.total_chains.max(1) as f32,
            memory_usage,
            processing_efficiency: sanitize_scalar(
                (attention.resource_utilization + reasoning.reasoning_throughput) / 2.0,
            ),
            convergence_status: ConvergenceStatus::classify(
                memory_usage,
                cognitive_load,
                attention.gradient_norm,
                reasoning,
            ),
            timestamp_ms: timestamp_ms(),
        }
    }

    pub fn is_stable(&self) -> bool {
        self.convergence_status == ConvergenceStatus::Stable
    }

    pub fn is_critical(&self) -> bool {
        self.convergence_status == ConvergenceStatus::Critical
    }

    pub fn mean_attention(&self) -> f32 {
        if self.attention_distribution.is_empty() {
            return 0.0;
        }
        self.attention_distribution.iter().sum::<f32>() / self.attention_distribution.len() as f32
    }
}

/// Bounded FIFO of snapshots, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct StateHistory {
    max_history: usize,
    states: VecDeque<SystemState>,
}

impl StateHistory {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            states: VecDeque::new(),
        }
    }

    pub fn push(&mut self, state: SystemState) {
        self.states.push_back(state);
        while self.states.len() > self.max_history {
            self.states.pop_front();
        }
    }

    /// Up to `count` most recent snapshots, oldest first.
    pub fn recent(&self, count: usize) -> impl Iterator<Item = &SystemState> {
        self.states.iter().skip(self.states.len().saturating_sub(count))
    }

    pub fn latest(&self) -> Option<&SystemState> {
        self.states.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemState> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn set_limit(&mut self, max_history: usize) {
        self.max_history = max_history.max(1);
        while self.states.len() > self.max_history {
            self.states.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

pub(crate) fn sanitize_scalar(value: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasoning(total: usize, confidence: f32) -> ReasoningStats {
        ReasoningStats {
            total_chains: total,
            active_chains: total,
            average_confidence: confidence,
            ..ReasoningStats::default()
        }
    }

    #[test]
    fn classification_precedence() {
        let calm = reasoning(0, 0.0);
        assert_eq!(
            ConvergenceStatus::classify(0.1, 0.1, 0.0, &calm),
            ConvergenceStatus::Stable
        );
        assert_eq!(
            ConvergenceStatus::classify(0.1, 0.1, 0.5, &calm),
            ConvergenceStatus::Adapting
        );
        assert_eq!(
            ConvergenceStatus::classify(0.1, 0.1, 0.0, &reasoning(2, 0.3)),
            ConvergenceStatus::Adapting
        );
        assert_eq!(
            ConvergenceStatus::classify(0.95, 0.1, 0.5, &calm),
            ConvergenceStatus::Critical
        );
        assert_eq!(
            ConvergenceStatus::classify(0.0, 0.85, 0.0, &calm),
            ConvergenceStatus::Critical
        );
    }

    #[test]
    fn rising_gradient_diverges() {
        let adapting = ConvergenceStatus::Adapting;
        assert_eq!(adapting.with_gradient_trend(None, 5.0), ConvergenceStatus::Adapting);
        assert_eq!(adapting.with_gradient_trend(Some(0.2), 0.25), ConvergenceStatus::Adapting);
        assert_eq!(adapting.with_gradient_trend(Some(0.2), 0.5), ConvergenceStatus::Diverging);
        assert_eq!(adapting.with_gradient_trend(Some(0.0), 0.05), ConvergenceStatus::Adapting);
        assert_eq!(
            ConvergenceStatus::Critical.with_gradient_trend(Some(0.1), 5.0),
            ConvergenceStatus::Critical
        );
        assert_eq!(
            ConvergenceStatus::Stable.with_gradient_trend(Some(0.0), 0.05),
            ConvergenceStatus::Stable
        );
    }

    #[test]
    fn history_is_bounded() {
        let mut history = StateHistory::new(3);
        for i in 0..5 {
            history.push(SystemState {
                cognitive_load: i as f32,
                attention_distribution: Vec::new(),
                reasoning_activity: 0.0,
                memory_usage: 0.0,
                processing_efficiency: 0.0,
                convergence_status: ConvergenceStatus::Stable,
                timestamp_ms: 0,
            });
        }
        let loads: Vec<f32> = history.iter().map(|s| s.cognitive_load).collect();
        assert_eq!(loads, vec![2.0, 3.0, 4.0]);
        let recent: Vec<f32> = history.recent(2).map(|s| s.cognitive_load).collect();
        assert_eq!(recent, vec![3.0, 4.0]);
    }

    #[test]
    fn snapshot_of_empty_system() {
        let state = SystemState::snapshot(
            &[],
            &[],
            &AttentionStats::default(),
            &ReasoningStats::default(),
            f32::NAN,
        );
        assert_eq!(state.cognitive_load, 0.0);
        assert_eq!(state.memory_usage, 0.0);
        assert_eq!(state.mean_attention(), 0.0);
        assert!(state.is_stable());
    }
}
