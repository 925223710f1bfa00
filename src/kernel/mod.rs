//! The cycle orchestrator.
//!
//! [`CognitiveKernel`] owns one tensor context and every engine built on it.
//! A [`tick`](CognitiveKernel::tick) is one full pass in fixed order:
//! attention, then reasoning, then meta-cognition, then performance metrics
//! and optional adaptive scaling. Hosts either call `tick` from their own
//! scheduler or hand the kernel to a [`KernelRunner`].

pub mod runner;

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::atomspace::{Atom, AtomeseNode, Link};
use crate::attention::{AttentionEngine, AttentionStats};
use crate::config::{ConfigError, KernelConfig, TensorConfig};
use crate::encoder::{EncodeError, TensorEncoder};
use crate::logging::{log_cycle, timestamp_ms, CycleLogEntry};
use crate::meta::{MetaCognitiveEngine, MetaCognitiveMetrics};
use crate::reasoning::{ChainFailure, ChainId, ReasoningEngine, ReasoningStats};
use crate::tensor::TensorContext;

pub use runner::KernelRunner;

const MAX_SCALED_REASONING_DEPTH: usize = 10;
const MIN_ATTENTION_FREQUENCY: f32 = 1.0;
const MAX_META_LEARNING_RATE: f32 = 0.1;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("kernel has been shut down")]
    Shutdown,
    #[error("failed to spawn kernel worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("kernel worker panicked")]
    WorkerPanicked,
}

/// Recoverable problems surfaced through the error callback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KernelFault {
    #[error("{} terminated by rule {}: {}", .0.chain_id, .0.rule_id, .0.error)]
    ChainTerminated(ChainFailure),
    #[error("encoding failed: {0}")]
    Encoding(EncodeError),
    #[error("cycle log write failed: {0}")]
    CycleLog(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelStatus {
    /// Constructed or reset; ticks are accepted.
    Active,
    /// Driven by a runner.
    Running,
    /// Stopped; ticks are still accepted.
    Paused,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PerformanceMetrics {
    pub cycles_per_second: f32,
    pub tensor_operations_per_second: f32,
    /// `1 − memory fraction in use`.
    pub memory_efficiency: f32,
    pub attention_allocation_efficiency: f32,
    pub reasoning_throughput: f32,
    /// Share of the cycle spent in the meta-cognitive stage.
    pub metacognitive_overhead: f32,
    /// Mean of memory, attention and reasoning efficiency, each capped at 1.
    pub overall_efficiency: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelState {
    pub status: KernelStatus,
    pub uptime: Duration,
    pub cycle_count: u64,
    pub last_cycle_time: Duration,
    pub performance: PerformanceMetrics,
    pub error_count: usize,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TensorStats {
    pub live_tensors: usize,
    pub memory_usage: usize,
    pub active_nodes: usize,
    pub active_links: usize,
}

/// Aggregated snapshot handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelStats {
    pub state: KernelState,
    pub attention: AttentionStats,
    pub reasoning: ReasoningStats,
    pub meta: MetaCognitiveMetrics,
    pub tensors: TensorStats,
}

/// Outcome of [`CognitiveKernel::ingest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub cycle_time: Duration,
    pub tensors_processed: usize,
    pub attention_updates: usize,
    pub reasoning_steps: usize,
    pub metacognitive_adaptations: usize,
    pub errors: Vec<String>,
}

type CycleCallback = Box<dyn FnMut(&KernelStats) + Send>;
type FaultCallback = Box<dyn FnMut(&KernelFault) + Send>;
type StateCallback = Box<dyn FnMut(&KernelState) + Send>;

pub struct CognitiveKernel {
    config: KernelConfig,
    ctx: TensorContext,
    encoder: TensorEncoder,
    attention: AttentionEngine,
    reasoning: ReasoningEngine,
    meta: MetaCognitiveEngine,
    status: KernelStatus,
    created: Instant,
    cycle_count: u64,
    last_cycle_time: Duration,
    performance: PerformanceMetrics,
    performance_history: VecDeque<PerformanceMetrics>,
    last_reasoning: ReasoningStats,
    error_count: usize,
    last_error: Option<String>,
    on_cycle_complete: Option<CycleCallback>,
    on_error: Option<FaultCallback>,
    on_state_change: Option<StateCallback>,
}

impl CognitiveKernel {
    /// Validate `config` and build every engine on one fresh tensor context.
    pub fn new(config: KernelConfig) -> Result<Self, KernelError> {
        config.validate()?;
        let ctx = TensorContext::new(config.tensor.max_memory_bytes, config.tensor.seed);
        let encoder = TensorEncoder::new(&config.tensor, ctx.clone());
        let attention = AttentionEngine::new(config.attention.clone());
        let reasoning = ReasoningEngine::new(config.reasoning.clone(), ctx.clone());
        let meta = MetaCognitiveEngine::new(config.meta.clone(), ctx.clone());
        info!(
            mechanism = ?config.attention.mechanism,
            tick_hz = config.integration.tick_frequency,
            "cognitive kernel initialised"
        );
        Ok(Self {
            config,
            ctx,
            encoder,
            attention,
            reasoning,
            meta,
            status: KernelStatus::Active,
            created: Instant::now(),
            cycle_count: 0,
            last_cycle_time: Duration::ZERO,
            performance: PerformanceMetrics::default(),
            performance_history: VecDeque::new(),
            last_reasoning: ReasoningStats::default(),
            error_count: 0,
            last_error: None,
            on_cycle_complete: None,
            on_error: None,
            on_state_change: None,
        })
    }

    pub fn on_cycle_complete(&mut self, callback: impl FnMut(&KernelStats) + Send + 'static) {
        self.on_cycle_complete = Some(Box::new(callback));
    }

    pub fn on_error(&mut self, callback: impl FnMut(&KernelFault) + Send + 'static) {
        self.on_error = Some(Box::new(callback));
    }

    pub fn on_state_change(&mut self, callback: impl FnMut(&KernelState) + Send + 'static) {
        self.on_state_change = Some(Box::new(callback));
    }

    /// Encode a batch and run one full pass over the updated caches.
    pub fn ingest(&mut self, atoms: &[Atom], links: &[Link]) -> Result<ProcessingResult, KernelError> {
        self.ensure_alive()?;
        let started = Instant::now();
        let batch = self.encoder.encode_batch(atoms, links);
        let errors: Vec<String> = batch.errors.iter().map(ToString::to_string).collect();
        for err in batch.errors {
            self.handle_fault(KernelFault::Encoding(err));
        }
        let processed = batch.nodes.len() + batch.links.len();
        self.process_encoded(started, processed, batch.nodes.len(), errors)
    }

    /// Encode Atomese nodes and run one full pass.
    pub fn ingest_atomese(&mut self, nodes: &[AtomeseNode]) -> Result<ProcessingResult, KernelError> {
        self.ensure_alive()?;
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut encoded = 0;
        for node in nodes {
            if node.id.is_empty() {
                let err = EncodeError::EmptyId { kind: "atomese node" };
                errors.push(err.to_string());
                self.handle_fault(KernelFault::Encoding(err));
                continue;
            }
            self.encoder.encode_atomese_node(node);
            encoded += 1;
        }
        self.process_encoded(started, encoded, encoded, errors)
    }

    fn process_encoded(
        &mut self,
        started: Instant,
        processed: usize,
        node_count: usize,
        errors: Vec<String>,
    ) -> Result<ProcessingResult, KernelError> {
        let (attention_updates, reasoning_steps, adaptations) = if node_count > 0 {
            let stats = self.tick()?;
            (
                stats.tensors.active_nodes,
                stats.reasoning.total_inferences,
                (stats.meta.adaptation_rate * 10.0).floor() as usize,
            )
        } else {
            (0, 0, 0)
        };
        Ok(ProcessingResult {
            success: errors.is_empty(),
            cycle_time: started.elapsed(),
            tensors_processed: processed,
            attention_updates,
            reasoning_steps,
            metacognitive_adaptations: adaptations,
            errors,
        })
    }

    /// Start a chain over the cached tensors of `atom_ids`. Unknown ids are
    /// skipped; `None` when none of them is cached.
    pub fn start_reasoning_chain<S: AsRef<str>>(&mut self, atom_ids: &[S]) -> Option<ChainId> {
        let nodes: Vec<_> = atom_ids
            .iter()
            .filter_map(|id| self.encoder.node(id.as_ref()))
            .collect();
        if nodes.is_empty() {
            return None;
        }
        Some(self.reasoning.start_reasoning_chain(nodes).id)
    }

    pub fn tick(&mut self) -> Result<KernelStats, KernelError> {
        self.tick_at(Instant::now())
    }

    /// One full pass with `now` as the clock reading for every debounce and
    /// retention check.
    pub fn tick_at(&mut self, now: Instant) -> Result<KernelStats, KernelError> {
        self.ensure_alive()?;
        let started = Instant::now();
        let ops_before = self.ctx.operation_count();

        let (nodes, links) = self.encoder.tensors_mut();
        let attention = self.attention.update_attention_allocation_at(now, nodes, links);

        let nodes = self.encoder.node_tensors();
        let links = self.encoder.link_tensors();
        let reasoning = self.reasoning.execute_reasoning_step_at(now, nodes, links);
        let failures = self.reasoning.last_failures().to_vec();

        let meta_started = Instant::now();
        let meta = self
            .meta
            .update_meta_cognitive_at(now, nodes, links, &attention, &reasoning);
        let meta_time = meta_started.elapsed();
        let cycle_time = started.elapsed();

        for failure in failures {
            self.handle_fault(KernelFault::ChainTerminated(failure));
        }

        let ops = self.ctx.operation_count().saturating_sub(ops_before);
        self.record_performance(cycle_time, meta_time, ops, &attention, &reasoning);
        self.cycle_count += 1;
        self.last_cycle_time = cycle_time;
        self.last_reasoning = reasoning;

        if self.config.integration.adaptive_scaling {
            self.adaptive_scaling(&attention, &reasoning, &meta);
        }

        let stats = self.stats();
        self.write_cycle_log(&stats);
        debug!(
            cycle = self.cycle_count,
            duration_us = cycle_time.as_micros() as u64,
            nodes = stats.tensors.active_nodes,
            chains = reasoning.active_chains,
            "cycle complete"
        );
        if let Some(callback) = self.on_cycle_complete.as_mut() {
            callback(&stats);
        }
        Ok(stats)
    }

    fn record_performance(
        &mut self,
        cycle_time: Duration,
        meta_time: Duration,
        ops: u64,
        attention: &AttentionStats,
        reasoning: &ReasoningStats,
    ) {
        let secs = cycle_time.as_secs_f32();
        let memory_efficiency = 1.0 - self.ctx.memory_stats().fraction();
        let attention_efficiency = attention.resource_utilization;
        let metrics = PerformanceMetrics {
            cycles_per_second: if secs > 0.0 { 1.0 / secs } else { 0.0 },
            tensor_operations_per_second: if secs > 0.0 { ops as f32 / secs } else { 0.0 },
            memory_efficiency,
            attention_allocation_efficiency: attention_efficiency,
            reasoning_throughput: reasoning.reasoning_throughput,
            metacognitive_overhead: if secs > 0.0 {
                meta_time.as_secs_f32() / secs
            } else {
                0.0
            },
            overall_efficiency: (memory_efficiency
                + attention_efficiency.min(1.0)
                + reasoning.reasoning_throughput.min(1.0))
                / 3.0,
        };
        self.performance = metrics;
        self.performance_history.push_back(metrics);
        while self.performance_history.len() > self.config.integration.performance_history {
            self.performance_history.pop_front();
        }
    }

    fn adaptive_scaling(
        &mut self,
        attention: &AttentionStats,
        reasoning: &ReasoningStats,
        meta: &MetaCognitiveMetrics,
    ) {
        if attention.resource_utilization > 0.9 {
            let current = self.config.attention.update_frequency;
            let frequency = (current * 0.9).max(MIN_ATTENTION_FREQUENCY);
            if frequency != current {
                match self.attention.set_update_frequency(frequency) {
                    Ok(()) => {
                        self.config.attention.update_frequency = frequency;
                        debug!(frequency, "attention update frequency reduced");
                    }
                    Err(err) => warn!(error = %err, "attention frequency not reduced"),
                }
            }
        }

        if reasoning.total_chains > 0 && reasoning.average_confidence < 0.3 {
            let current = self.config.reasoning.max_reasoning_depth;
            let depth = (current + 1).min(MAX_SCALED_REASONING_DEPTH);
            if depth != current {
                self.config.reasoning.max_reasoning_depth = depth;
                self.reasoning.set_max_reasoning_depth(depth);
                debug!(depth, "reasoning depth increased");
            }
        }

        if meta.convergence_status.is_some() && meta.system_coherence < 0.5 {
            let current = self.config.meta.adaptation_rate;
            let rate = (current * 1.1).min(MAX_META_LEARNING_RATE);
            if rate != current {
                self.config.meta.adaptation_rate = rate;
                self.meta.set_adaptation_rate(rate);
                debug!(rate, "meta adaptation rate increased");
            }
        }
    }

    fn write_cycle_log(&mut self, stats: &KernelStats) {
        let Some(path) = self.config.integration.cycle_log.clone() else {
            return;
        };
        let entry = CycleLogEntry {
            cycle: self.cycle_count,
            timestamp_ms: timestamp_ms(),
            cycle_duration_ms: stats.state.last_cycle_time.as_secs_f64() * 1000.0,
            node_count: stats.tensors.active_nodes,
            link_count: stats.tensors.active_links,
            total_attention: stats.attention.total_attention,
            attention_entropy: stats.attention.attention_entropy,
            active_chains: stats.reasoning.active_chains,
            average_confidence: stats.reasoning.average_confidence,
            system_coherence: stats.meta.system_coherence,
            convergence_status: stats
                .meta
                .convergence_status
                .map_or("unknown", |s| s.as_str())
                .to_string(),
            memory_usage_bytes: stats.tensors.memory_usage,
        };
        if let Err(err) = log_cycle(&path, &entry) {
            self.handle_fault(KernelFault::CycleLog(err.to_string()));
        }
    }

    fn handle_fault(&mut self, fault: KernelFault) {
        warn!(error = %fault, "kernel fault");
        self.error_count += 1;
        self.last_error = Some(fault.to_string());
        if let Some(callback) = self.on_error.as_mut() {
            callback(&fault);
        }
    }

    fn ensure_alive(&self) -> Result<(), KernelError> {
        if self.status == KernelStatus::Shutdown {
            Err(KernelError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn set_status(&mut self, status: KernelStatus) {
        if self.status == status {
            return;
        }
        self.status = status;
        let state = self.state();
        if let Some(callback) = self.on_state_change.as_mut() {
            callback(&state);
        }
    }

    /// Mark the kernel as driven. Fails once shut down.
    pub fn start(&mut self) -> Result<(), KernelError> {
        self.ensure_alive()?;
        self.set_status(KernelStatus::Running);
        info!(tick_hz = self.config.integration.tick_frequency, "cognitive kernel started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if matches!(self.status, KernelStatus::Running) {
            self.set_status(KernelStatus::Paused);
            info!("cognitive kernel stopped");
        }
    }

    /// Clear every cache, chain and history. The vocabulary and rule set are
    /// kept.
    pub fn reset(&mut self) -> Result<(), KernelError> {
        self.ensure_alive()?;
        self.stop();
        self.encoder.clear_cache();
        self.attention.reset();
        self.reasoning.reset();
        self.meta.reset();
        self.cycle_count = 0;
        self.last_cycle_time = Duration::ZERO;
        self.performance = PerformanceMetrics::default();
        self.performance_history.clear();
        self.last_reasoning = ReasoningStats::default();
        self.error_count = 0;
        self.last_error = None;
        self.created = Instant::now();
        self.set_status(KernelStatus::Active);
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.stop();
        self.set_status(KernelStatus::Shutdown);
        info!(cycles = self.cycle_count, "cognitive kernel shut down");
    }

    pub fn state(&self) -> KernelState {
        KernelState {
            status: self.status,
            uptime: self.created.elapsed(),
            cycle_count: self.cycle_count,
            last_cycle_time: self.last_cycle_time,
            performance: self.performance,
            error_count: self.error_count,
            last_error: self.last_error.clone(),
        }
    }

    pub fn stats(&self) -> KernelStats {
        let memory = self.ctx.memory_stats();
        let nodes = self.encoder.node_tensors();
        let mut reasoning = self.reasoning.stats();
        reasoning.reasoning_throughput = self.last_reasoning.reasoning_throughput;
        KernelStats {
            state: self.state(),
            attention: self.attention.current_stats(nodes),
            reasoning,
            meta: self.meta.metrics(),
            tensors: TensorStats {
                live_tensors: memory.live_tensors,
                memory_usage: memory.used_bytes,
                active_nodes: nodes.len(),
                active_links: self.encoder.link_tensors().len(),
            },
        }
    }

    pub fn status(&self) -> KernelStatus {
        self.status
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn performance_history(&self) -> impl Iterator<Item = &PerformanceMetrics> {
        self.performance_history.iter()
    }

    /// Validate `config` and hand each section to its engine. Tensor widths
    /// and the seed are fixed at construction; only the memory capacity may
    /// change. On error nothing is applied.
    pub fn update_config(&mut self, config: KernelConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let fixed = TensorConfig {
            max_memory_bytes: self.config.tensor.max_memory_bytes,
            ..config.tensor.clone()
        };
        if fixed != self.config.tensor {
            return Err(ConfigError::Invalid {
                field: "tensor",
                reason: "widths and seed cannot change after construction".into(),
            });
        }

        self.attention.update_config(config.attention.clone())?;
        self.reasoning.update_config(config.reasoning.clone())?;
        self.meta.update_config(config.meta.clone())?;
        self.ctx.set_max_memory(config.tensor.max_memory_bytes);
        while self.performance_history.len() > config.integration.performance_history {
            self.performance_history.pop_front();
        }
        info!(
            mechanism = ?config.attention.mechanism,
            tick_hz = config.integration.tick_frequency,
            "kernel configuration updated"
        );
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn context(&self) -> &TensorContext {
        &self.ctx
    }

    pub fn encoder(&self) -> &TensorEncoder {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut TensorEncoder {
        &mut self.encoder
    }

    pub fn attention(&self) -> &AttentionEngine {
        &self.attention
    }

    pub fn reasoning(&self) -> &ReasoningEngine {
        &self.reasoning
    }

    pub fn reasoning_mut(&mut self) -> &mut ReasoningEngine {
        &mut self.reasoning
    }

    pub fn meta(&self) -> &MetaCognitiveEngine {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut MetaCognitiveEngine {
        &mut self.meta
    }
}

impl std::fmt::Debug for CognitiveKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CognitiveKernel")
            .field("status", &self.status)
            .field("cycle_count", &self.cycle_count)
            .field("nodes", &self.encoder.node_tensors().len())
            .field("links", &self.encoder.link_tensors().len())
            .finish_non_exhaustive()
    }
}
