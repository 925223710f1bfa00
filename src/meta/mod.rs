//! Meta-cognitive feedback.
//!
//! The engine watches the rest of the kernel through periodic
//! [`SystemState`] snapshots and reacts in a fixed order on every effective
//! update:
//!
//! 1. snapshot the system state,
//! 2. fold it into every meta-level tensor,
//! 3. propagate the inter-component feedback loops,
//! 4. adapt meta-level weights (2× rate when critical, 1× when adapting or
//!    diverging),
//! 5. adjust membrane permeability and leak external signals inward,
//! 6. record a self-modification when efficiency is poor or the state is
//!    critical.
//!
//! Updates arriving faster than `monitoring_frequency` allows only recompute
//! the metrics.

pub mod feedback;
pub mod membrane;
pub mod metrics;
pub mod modification;
pub mod state;
pub mod tensors;

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::attention::AttentionStats;
use crate::config::{ConfigError, MetaConfig};
use crate::encoder::{LinkTensor, NodeTensor};
use crate::logging::timestamp_ms;
use crate::reasoning::ReasoningStats;
use crate::tensor::TensorContext;

pub use feedback::{Component, FeedbackLoop, LoopType, FEEDBACK_WIDTH};
pub use membrane::{permeability_factor, Membrane, MembraneKind, MEMBRANE_WIDTH};
pub use metrics::{MetaCognitiveMetrics, METRICS_WINDOW, MODIFICATION_WINDOW_MS};
pub use modification::{ModificationKind, ModificationLog, SelfModification};
pub use state::{ConvergenceStatus, StateHistory, SystemState};
pub use tensors::{level_width, MetaCognitiveTensor};

const ADAPTATION_HISTORY: usize = 100;

#[derive(Debug)]
pub struct MetaCognitiveEngine {
    ctx: TensorContext,
    config: MetaConfig,
    levels: Vec<MetaCognitiveTensor>,
    membranes: Vec<Membrane>,
    loops: Vec<FeedbackLoop>,
    history: StateHistory,
    adaptation_history: VecDeque<f32>,
    modifications: ModificationLog,
    started: Instant,
    last_update: Option<Instant>,
    last_gradient_norm: Option<f32>,
}

impl MetaCognitiveEngine {
    pub fn new(config: MetaConfig, ctx: TensorContext) -> Self {
        let history = StateHistory::new(config.history_limit);
        let modifications =
            ModificationLog::new(config.modification_log_limit, config.modification_journal.clone());
        let mut engine = Self {
            ctx,
            config,
            levels: Vec::new(),
            membranes: Vec::new(),
            loops: Vec::new(),
            history,
            adaptation_history: VecDeque::new(),
            modifications,
            started: Instant::now(),
            last_update: None,
            last_gradient_norm: None,
        };
        engine.build_structures();
        engine
    }

    fn build_structures(&mut self) {
        let ctx = &self.ctx;
        self.levels = (0..self.config.meta_levels)
            .map(|level| MetaCognitiveTensor::new(ctx, level, self.config.convergence_threshold))
            .collect();
        self.membranes = MembraneKind::ALL
            .iter()
            .map(|&kind| Membrane::new(ctx, kind, self.config.membrane_permeability))
            .collect();
        self.loops = FeedbackLoop::all(ctx);
    }

    fn release_structures(&mut self) {
        let ctx = &self.ctx;
        let level_tensors = self.levels.iter().flat_map(|l| l.tensors());
        let membrane_tensors = self.membranes.iter().flat_map(|m| m.tensors());
        for tensor in level_tensors.chain(membrane_tensors) {
            ctx.release(tensor);
        }
        for feedback in &self.loops {
            ctx.release(&feedback.feedback_tensor);
        }
        self.levels.clear();
        self.membranes.clear();
        self.loops.clear();
    }

    pub fn update_meta_cognitive(
        &mut self,
        nodes: &[NodeTensor],
        links: &[LinkTensor],
        attention: &AttentionStats,
        reasoning: &ReasoningStats,
    ) -> MetaCognitiveMetrics {
        self.update_meta_cognitive_at(Instant::now(), nodes, links, attention, reasoning)
    }

    pub fn update_meta_cognitive_at(
        &mut self,
        now: Instant,
        nodes: &[NodeTensor],
        links: &[LinkTensor],
        attention: &AttentionStats,
        reasoning: &ReasoningStats,
    ) -> MetaCognitiveMetrics {
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) < self.config.monitoring_interval() {
                return self.metrics();
            }
        }

        let memory = self.ctx.memory_stats().fraction();
        let mut state = SystemState::snapshot(nodes, links, attention, reasoning, memory);
        state.convergence_status = state
            .convergence_status
            .with_gradient_trend(self.last_gradient_norm, attention.gradient_norm);
        self.last_gradient_norm = Some(attention.gradient_norm);
        self.apply_system_state_at(now, state, nodes)
    }

    /// Run steps 2-6 for an externally supplied snapshot. Not rate-limited.
    pub fn apply_system_state(&mut self, state: SystemState, nodes: &[NodeTensor]) -> MetaCognitiveMetrics {
        self.apply_system_state_at(Instant::now(), state, nodes)
    }

    pub fn apply_system_state_at(
        &mut self,
        now: Instant,
        state: SystemState,
        nodes: &[NodeTensor],
    ) -> MetaCognitiveMetrics {
        let elapsed = now.saturating_duration_since(self.started).as_secs_f32();
        let damping = self.config.feedback_damping;

        for level in &mut self.levels {
            level.observe(&state, nodes, elapsed, damping);
        }

        for feedback in &mut self.loops {
            feedback.propagate(&state, elapsed, damping);
        }

        let rate = match state.convergence_status {
            ConvergenceStatus::Critical => self.config.adaptation_rate * 2.0,
            ConvergenceStatus::Adapting | ConvergenceStatus::Diverging => self.config.adaptation_rate,
            ConvergenceStatus::Stable => 0.0,
        };
        if rate > 0.0 {
            let plasticity = self.config.plasticity;
            for level in &mut self.levels {
                level.adapt(rate, plasticity);
            }
        }
        self.adaptation_history.push_back(rate);
        while self.adaptation_history.len() > ADAPTATION_HISTORY {
            self.adaptation_history.pop_front();
        }

        let factor = permeability_factor(&state);
        for membrane in &mut self.membranes {
            membrane.sense(&state);
            membrane.adjust(factor);
        }

        if state.processing_efficiency < 0.3 || state.is_critical() {
            self.self_modify(&state);
        }

        debug!(
            status = state.convergence_status.as_str(),
            load = state.cognitive_load,
            memory = state.memory_usage,
            efficiency = state.processing_efficiency,
            rate,
            "meta-cognitive update"
        );
        self.history.push(state);
        self.last_update = Some(now);
        self.metrics()
    }

    fn self_modify(&mut self, state: &SystemState) {
        let stamp = timestamp_ms();
        let entry = self
            .ctx
            .with_rng(|rng| SelfModification::synthesize(state, stamp, rng));
        match self.modifications.record(entry) {
            Ok(recorded) => info!(
                id = %recorded.id,
                kind = ?recorded.kind,
                effectiveness = recorded.effectiveness_score,
                "self-modification recorded"
            ),
            Err(err) => warn!(error = %err, "failed to journal self-modification"),
        }
    }

    /// Metrics over the most recent snapshots.
    pub fn metrics(&self) -> MetaCognitiveMetrics {
        let rates: Vec<f32> = self
            .adaptation_history
            .iter()
            .skip(self.adaptation_history.len().saturating_sub(METRICS_WINDOW))
            .copied()
            .collect();
        let stability: Vec<f32> = self.loops.iter().map(|l| l.stability_measure).collect();
        MetaCognitiveMetrics::aggregate(
            self.history.recent(METRICS_WINDOW),
            &rates,
            &stability,
            self.modifications
                .count_since(timestamp_ms(), MODIFICATION_WINDOW_MS),
            self.config.meta_attention_allocation,
        )
    }

    pub fn meta_tensor(&self, level: usize) -> Option<&MetaCognitiveTensor> {
        self.levels.get(level)
    }

    pub fn meta_tensors(&self) -> &[MetaCognitiveTensor] {
        &self.levels
    }

    pub fn membrane(&self, kind: MembraneKind) -> Option<&Membrane> {
        self.membranes.iter().find(|m| m.kind == kind)
    }

    pub fn membranes(&self) -> &[Membrane] {
        &self.membranes
    }

    pub fn feedback_loops(&self) -> &[FeedbackLoop] {
        &self.loops
    }

    pub fn state_history(&self) -> &StateHistory {
        &self.history
    }

    pub fn modifications(&self) -> &ModificationLog {
        &self.modifications
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    pub fn set_adaptation_rate(&mut self, rate: f32) {
        self.config.adaptation_rate = rate;
    }

    /// Apply new parameters. Structures are rebuilt when the level count or
    /// base permeability changes. Invalid parameters are rejected and the
    /// engine is left untouched.
    pub fn update_config(&mut self, config: MetaConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let rebuild = config.meta_levels != self.config.meta_levels
            || config.membrane_permeability != self.config.membrane_permeability
            || config.convergence_threshold != self.config.convergence_threshold;
        self.history.set_limit(config.history_limit);
        self.modifications
            .reconfigure(config.modification_log_limit, config.modification_journal.clone());
        self.config = config;
        if rebuild {
            self.release_structures();
            self.build_structures();
        }
        Ok(())
    }

    /// Forget all history and rebuild every tensor from fresh draws.
    pub fn reset(&mut self) {
        self.release_structures();
        self.history.clear();
        self.adaptation_history.clear();
        self.modifications.clear();
        self.last_update = None;
        self.last_gradient_norm = None;
        self.started = Instant::now();
        self.build_structures();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn engine() -> MetaCognitiveEngine {
        MetaCognitiveEngine::new(MetaConfig::default(), TensorContext::with_seed(8))
    }

    fn state(status: ConvergenceStatus, memory: f32, efficiency: f32) -> SystemState {
        SystemState {
            cognitive_load: 0.1,
            attention_distribution: vec![0.5],
            reasoning_activity: 0.5,
            memory_usage: memory,
            processing_efficiency: efficiency,
            convergence_status: status,
            timestamp_ms: timestamp_ms(),
        }
    }

    #[test]
    fn structures_match_configuration() {
        let engine = engine();
        assert_eq!(engine.meta_tensors().len(), 3);
        assert_eq!(engine.membranes().len(), 4);
        assert_eq!(engine.feedback_loops().len(), 12);
        assert_eq!(engine.meta_tensor(1).map(|t| t.width()), Some(80));
    }

    #[test]
    fn critical_memory_is_reported_and_narrows_membranes() {
        let ctx = TensorContext::with_seed(8);
        let mut engine = MetaCognitiveEngine::new(MetaConfig::default(), ctx.clone());
        let used = ctx.memory_stats().used_bytes;
        ctx.set_max_memory(used * 100 / 95);

        let before: Vec<f32> = engine.membranes().iter().map(Membrane::mean_permeability).collect();
        let metrics = engine.update_meta_cognitive(
            &[],
            &[],
            &AttentionStats::default(),
            &ReasoningStats::default(),
        );
        assert_eq!(metrics.convergence_status, Some(ConvergenceStatus::Critical));
        let after: Vec<f32> = engine.membranes().iter().map(Membrane::mean_permeability).collect();
        assert!(before.iter().zip(&after).any(|(b, a)| a < b));
        assert_eq!(engine.modifications().len(), 1);
        assert_eq!(
            engine.modifications().entries().next().map(|m| m.kind),
            Some(ModificationKind::StructureChange)
        );
    }

    #[test]
    fn stable_state_does_not_adapt() {
        let mut engine = engine();
        engine.apply_system_state(state(ConvergenceStatus::Stable, 0.1, 0.5), &[]);
        let untouched = engine
            .meta_tensors()
            .iter()
            .all(|t| t.adaptation_weights.data.iter().all(|w| *w == 0.0));
        assert!(untouched);
        assert_eq!(engine.metrics().adaptation_rate, 0.0);
        assert!(engine.modifications().is_empty());
    }

    #[test]
    fn critical_state_adapts_at_double_rate() {
        let mut engine = engine();
        let metrics = engine.apply_system_state(state(ConvergenceStatus::Critical, 0.95, 0.5), &[]);
        assert!((metrics.adaptation_rate - 0.02).abs() < 1e-6);
        assert!(engine
            .meta_tensors()
            .iter()
            .any(|t| t.adaptation_weights.data.iter().any(|w| *w != 0.0)));
    }

    #[test]
    fn updates_are_rate_limited() {
        let mut engine = engine();
        let start = Instant::now();
        let stats = (AttentionStats::default(), ReasoningStats::default());
        engine.update_meta_cognitive_at(start, &[], &[], &stats.0, &stats.1);
        engine.update_meta_cognitive_at(start + Duration::from_millis(50), &[], &[], &stats.0, &stats.1);
        assert_eq!(engine.state_history().len(), 1);
        engine.update_meta_cognitive_at(start + Duration::from_millis(250), &[], &[], &stats.0, &stats.1);
        assert_eq!(engine.state_history().len(), 2);
    }

    #[test]
    fn reset_restores_accounting() {
        let ctx = TensorContext::with_seed(8);
        let mut engine = MetaCognitiveEngine::new(MetaConfig::default(), ctx.clone());
        let baseline = ctx.memory_stats().used_bytes;
        engine.apply_system_state(state(ConvergenceStatus::Critical, 0.95, 0.1), &[]);
        engine.reset();
        assert_eq!(ctx.memory_stats().used_bytes, baseline);
        assert!(engine.state_history().is_empty());
        assert!(engine.modifications().is_empty());
    }

    #[test]
    fn level_count_change_rebuilds() {
        let mut engine = engine();
        engine
            .update_config(MetaConfig {
                meta_levels: 5,
                ..MetaConfig::default()
            })
            .unwrap();
        assert_eq!(engine.meta_tensors().len(), 5);
        assert_eq!(engine.meta_tensor(4).map(|t| t.width()), Some(20));

        let rejected = engine.update_config(MetaConfig {
            meta_levels: 0,
            ..MetaConfig::default()
        });
        assert!(rejected.is_err());
        assert_eq!(engine.meta_tensors().len(), 5);
    }

    #[test]
    fn growing_gradient_is_reported_as_diverging() {
        let mut engine = engine();
        let start = Instant::now();
        let reasoning = ReasoningStats::default();
        let gradient = |norm| AttentionStats {
            gradient_norm: norm,
            ..AttentionStats::default()
        };

        let first = engine.update_meta_cognitive_at(start, &[], &[], &gradient(0.2), &reasoning);
        assert_eq!(first.convergence_status, Some(ConvergenceStatus::Adapting));

        let later = start + Duration::from_millis(250);
        let second = engine.update_meta_cognitive_at(later, &[], &[], &gradient(0.5), &reasoning);
        assert_eq!(second.convergence_status, Some(ConvergenceStatus::Diverging));
        assert!(engine
            .meta_tensors()
            .iter()
            .any(|t| t.adaptation_weights.data.iter().any(|w| *w != 0.0)));

        engine.reset();
        let fresh = engine.update_meta_cognitive_at(later, &[], &[], &gradient(0.5), &reasoning);
        assert_eq!(fresh.convergence_status, Some(ConvergenceStatus::Adapting));
    }
}
