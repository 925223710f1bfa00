use std::fmt::{self, Display};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::tensor::{KernelTensor, TensorId};

/// Mean |confidence change| over the last three steps below which a chain is
/// considered converged.
pub const CONVERGENCE_EPSILON: f32 = 0.01;
const CONVERGENCE_WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ChainId(pub u64);

impl Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Active,
    Converged,
    Diverged,
    Terminated,
}

impl ChainStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChainStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepMetadata {
    pub reasoning_time: Duration,
    pub memory_usage: usize,
    /// Mean L1 mass of the premise tensors.
    pub attention_consumed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningStep {
    pub id: String,
    pub step_number: usize,
    pub rule_applied: String,
    pub input_tensors: Vec<TensorId>,
    pub output_tensor: TensorId,
    pub confidence_change: f32,
    pub tensor_operations: Vec<&'static str>,
    pub metadata: StepMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningChain {
    pub id: ChainId,
    pub input_nodes: Vec<String>,
    pub steps: Vec<ReasoningStep>,
    pub current_depth: usize,
    pub confidence_score: f32,
    pub status: ChainStatus,
    /// Seed tensor followed by one output per step.
    pub output_tensors: Vec<KernelTensor>,
    #[serde(skip)]
    pub(crate) last_activity: Instant,
}

impl ReasoningChain {
    pub(crate) fn new(id: ChainId, input_nodes: Vec<String>, seed: KernelTensor, now: Instant) -> Self {
        Self {
            id,
            input_nodes,
            steps: Vec::new(),
            current_depth: 0,
            confidence_score: 1.0,
            status: ChainStatus::Active,
            output_tensors: vec![seed],
            last_activity: now,
        }
    }

    pub fn last_step(&self) -> Option<&ReasoningStep> {
        self.steps.last()
    }

    /// The `count` most recent outputs, oldest first.
    pub fn premises(&self, count: usize) -> &[KernelTensor] {
        let start = self.output_tensors.len().saturating_sub(count);
        &self.output_tensors[start..]
    }

    pub fn used_recently(&self, rule_id: &str) -> bool {
        self.steps
            .iter()
            .rev()
            .take(CONVERGENCE_WINDOW)
            .any(|step| step.rule_applied == rule_id)
    }

    pub fn has_settled(&self) -> bool {
        if self.steps.len() < CONVERGENCE_WINDOW {
            return false;
        }
        let recent = &self.steps[self.steps.len() - CONVERGENCE_WINDOW..];
        let mean = recent
            .iter()
            .map(|step| step.confidence_change.abs())
            .sum::<f32>()
            / CONVERGENCE_WINDOW as f32;
        mean < CONVERGENCE_EPSILON
    }

    pub fn tensor_bytes(&self) -> usize {
        self.output_tensors.iter().map(KernelTensor::size_bytes).sum()
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}
