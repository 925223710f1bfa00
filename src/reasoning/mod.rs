//! Recursive reasoning over encoded tensors.
//!
//! Each [`ReasoningChain`] starts from the normalised sum of its input
//! embeddings and grows by one inference per [`ReasoningEngine::execute_reasoning_step`]
//! call. A chain moves from `Active` to exactly one terminal state:
//!
//! * `Converged` when no rule applies or the last three confidence changes
//!   average below [`CONVERGENCE_EPSILON`],
//! * `Diverged` when its confidence drops under the configured threshold,
//! * `Terminated` when a tensor operation fails; other chains are unaffected.
//!
//! Terminal chains are pruned once they have been idle for the retention
//! window, releasing their tensors back to the context.

pub mod chain;
pub mod rules;

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, error};

use crate::config::{ConfigError, ReasoningConfig};
use crate::encoder::{LinkTensor, NodeTensor};
use crate::tensor::{DType, KernelTensor, TensorContext, TensorError, TensorResult};

pub use chain::{ChainId, ChainStatus, ReasoningChain, ReasoningStep, StepMetadata, CONVERGENCE_EPSILON};
pub use rules::{default_rules, InferenceRule, RuleType, TensorOperation};

const SELECTION_JITTER: f32 = 0.1;
const FRESH_RULE_BONUS: f32 = 0.1;

/// Aggregate view over every retained chain after a step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ReasoningStats {
    pub total_chains: usize,
    pub active_chains: usize,
    pub converged_chains: usize,
    pub diverged_chains: usize,
    pub terminated_chains: usize,
    pub average_depth: f32,
    pub total_inferences: usize,
    pub average_confidence: f32,
    pub tensor_memory_usage: usize,
    /// Inferences this call per chain considered.
    pub reasoning_throughput: f32,
}

/// A chain abandoned during the last step.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainFailure {
    pub chain_id: ChainId,
    pub rule_id: String,
    pub error: TensorError,
}

#[derive(Debug)]
pub struct ReasoningEngine {
    ctx: TensorContext,
    config: ReasoningConfig,
    rules: Vec<InferenceRule>,
    chains: BTreeMap<ChainId, ReasoningChain>,
    history: VecDeque<ReasoningStep>,
    next_chain: u64,
    last_failures: Vec<ChainFailure>,
}

impl ReasoningEngine {
    /// Engine with the default rule set.
    pub fn new(config: ReasoningConfig, ctx: TensorContext) -> Self {
        Self::with_rules(config, ctx, default_rules())
    }

    pub fn with_rules(config: ReasoningConfig, ctx: TensorContext, rules: Vec<InferenceRule>) -> Self {
        let mut engine = Self {
            ctx,
            config,
            rules: Vec::new(),
            chains: BTreeMap::new(),
            history: VecDeque::new(),
            next_chain: 0,
            last_failures: Vec::new(),
        };
        for rule in rules {
            engine.add_rule(rule);
        }
        engine
    }

    pub fn start_reasoning_chain<'a, I>(&mut self, nodes: I) -> &ReasoningChain
    where
        I: IntoIterator<Item = &'a NodeTensor>,
    {
        self.start_reasoning_chain_at(Instant::now(), nodes)
    }

    pub fn start_reasoning_chain_at<'a, I>(&mut self, now: Instant, nodes: I) -> &ReasoningChain
    where
        I: IntoIterator<Item = &'a NodeTensor>,
    {
        let nodes: Vec<&NodeTensor> = nodes.into_iter().collect();
        let id = ChainId(self.next_chain);
        self.next_chain += 1;

        let seed = self.seed_tensor(id, &nodes);
        let inputs = nodes.iter().map(|n| n.atom_id.clone()).collect();
        debug!(chain = %id, inputs = nodes.len(), "reasoning chain started");
        self.chains
            .entry(id)
            .or_insert(ReasoningChain::new(id, inputs, seed, now))
    }

    /// L2-normalised sum of the input embeddings; a single zero when there
    /// are no inputs.
    fn seed_tensor(&self, id: ChainId, nodes: &[&NodeTensor]) -> KernelTensor {
        let label = format!("{id}_seed");
        let Some(first) = nodes.first() else {
            return self.ctx.create(&[1], DType::F32, Some(&label), false);
        };
        let width = first.embedding.len();
        let mut seed = self.ctx.create(&[width], DType::F32, Some(&label), false);
        for node in nodes {
            for (acc, value) in seed.data.iter_mut().zip(&node.embedding.data) {
                *acc += value;
            }
        }
        let norm = seed.l2_norm();
        if norm > 0.0 {
            seed.data.iter_mut().for_each(|v| *v /= norm);
        }
        seed
    }

    pub fn execute_reasoning_step(&mut self, nodes: &[NodeTensor], links: &[LinkTensor]) -> ReasoningStats {
        self.execute_reasoning_step_at(Instant::now(), nodes, links)
    }

    /// Advance every active chain below `max_reasoning_depth`, oldest first,
    /// in batches of `parallel_chains`.
    pub fn execute_reasoning_step_at(
        &mut self,
        now: Instant,
        _nodes: &[NodeTensor],
        _links: &[LinkTensor],
    ) -> ReasoningStats {
        self.last_failures.clear();
        let max_depth = self.config.max_reasoning_depth;
        let eligible: Vec<ChainId> = self
            .chains
            .values()
            .filter(|c| c.status == ChainStatus::Active && c.current_depth < max_depth)
            .map(|c| c.id)
            .collect();

        let mut inferences = 0;
        for batch in eligible.chunks(self.config.parallel_chains.max(1)) {
            for id in batch {
                let Some(mut chain) = self.chains.remove(id) else {
                    continue;
                };
                match self.advance(&mut chain, now) {
                    Ok(true) => inferences += 1,
                    Ok(false) => {}
                    Err((rule_id, err)) => {
                        error!(chain = %chain.id, rule = %rule_id, error = %err, "reasoning chain terminated");
                        chain.status = ChainStatus::Terminated;
                        chain.last_activity = now;
                        self.last_failures.push(ChainFailure {
                            chain_id: chain.id,
                            rule_id,
                            error: err,
                        });
                    }
                }
                self.chains.insert(chain.id, chain);
            }
            debug!(batch = batch.len(), "reasoning batch advanced");
        }

        self.prune(now);
        let mut stats = self.stats();
        stats.reasoning_throughput = inferences as f32 / eligible.len().max(1) as f32;
        stats
    }

    /// One inference on `chain`. Returns whether a step was appended.
    fn advance(&mut self, chain: &mut ReasoningChain, now: Instant) -> Result<bool, (String, TensorError)> {
        let Some(rule) = self.select_rule(chain) else {
            chain.status = ChainStatus::Converged;
            chain.last_activity = now;
            return Ok(false);
        };

        let started = Instant::now();
        let premises = chain.premises(rule.premise_arity());
        let output = self
            .apply_operation(rule.tensor_operation, premises)
            .map_err(|err| (rule.id.clone(), err))?;
        let change = confidence_change(premises, &output, rule.rule_type);

        let step = ReasoningStep {
            id: format!("step_{}_{}", chain.id, chain.steps.len()),
            step_number: chain.steps.len(),
            rule_applied: rule.id.clone(),
            input_tensors: premises.iter().map(|t| t.id).collect(),
            output_tensor: output.id,
            confidence_change: change,
            tensor_operations: vec![rule.tensor_operation.label()],
            metadata: StepMetadata {
                reasoning_time: started.elapsed(),
                memory_usage: output.size_bytes(),
                attention_consumed: attention_consumed(premises),
            },
        };

        self.history.push_back(step.clone());
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }

        chain.steps.push(step);
        chain.current_depth += 1;
        chain.confidence_score *= 1.0 - change;
        chain.output_tensors.push(output);
        chain.last_activity = now;

        if chain.confidence_score < self.config.confidence_threshold {
            chain.status = ChainStatus::Diverged;
        } else if chain.has_settled() {
            chain.status = ChainStatus::Converged;
        }
        Ok(true)
    }

    fn select_rule(&self, chain: &ReasoningChain) -> Option<InferenceRule> {
        let available = chain.output_tensors.len();
        let applicable: Vec<&InferenceRule> = self
            .rules
            .iter()
            .filter(|rule| rule.premise_arity() <= available)
            .collect();

        match applicable.as_slice() {
            [] => None,
            [only] => Some((*only).clone()),
            _ => {
                let mut best: Option<(&InferenceRule, f32)> = None;
                for rule in applicable {
                    let mut score = rule.rule_type.selection_bonus(chain.confidence_score);
                    if !chain.used_recently(&rule.id) {
                        score += FRESH_RULE_BONUS;
                    }
                    score += self.ctx.with_rng(|rng| rng.gen_range(0.0..SELECTION_JITTER));
                    if best.map_or(true, |(_, top)| score > top) {
                        best = Some((rule, score));
                    }
                }
                best.map(|(rule, _)| rule.clone())
            }
        }
    }

    fn apply_operation(&self, op: TensorOperation, premises: &[KernelTensor]) -> TensorResult<KernelTensor> {
        match op {
            TensorOperation::Contraction => self.contraction(premises),
            TensorOperation::Composition => self.composition(premises),
            TensorOperation::Transformation => self.transformation(premises),
        }
    }

    fn contraction(&self, premises: &[KernelTensor]) -> TensorResult<KernelTensor> {
        let [.., previous, last] = premises else {
            return Err(TensorError::InvalidAxis {
                operation: "contraction",
                axis: 0,
                rank: premises.len(),
            });
        };
        let scalar = self.ctx.contract(previous, last, &[(0, 0)])?;
        let factor = scalar.get(0);
        self.ctx.release(&scalar);
        self.ctx.scale(last, factor)
    }

    fn composition(&self, premises: &[KernelTensor]) -> TensorResult<KernelTensor> {
        let Some((first, rest)) = premises.split_first() else {
            return Err(TensorError::InvalidAxis {
                operation: "composition",
                axis: 0,
                rank: 0,
            });
        };
        let mut result = self.ctx.clone_tensor(first);
        for (i, premise) in rest.iter().enumerate() {
            let scaled = self.ctx.scale(premise, 1.0 / (i + 2) as f32)?;
            let sum = self.ctx.add(&result, &scaled);
            self.ctx.release(&scaled);
            self.ctx.release(&result);
            result = sum?;
        }
        Ok(result)
    }

    fn transformation(&self, premises: &[KernelTensor]) -> TensorResult<KernelTensor> {
        let Some(input) = premises.last() else {
            return Err(TensorError::InvalidAxis {
                operation: "transformation",
                axis: 0,
                rank: 0,
            });
        };
        let n = input.len();
        let weights = self.ctx.with_rng(|rng| {
            (0..n * n)
                .map(|k| {
                    let noise: f32 = rng.gen_range(-0.5..0.5);
                    if k / n == k % n {
                        1.0 + noise * 0.1
                    } else {
                        noise * 0.05
                    }
                })
                .collect::<Vec<f32>>()
        });
        let matrix = self.ctx.from_vec(&[n, n], weights, None, false)?;
        let column = self.ctx.reshape(input, &[n, 1])?;
        let product = self.ctx.matmul(&matrix, &column);
        self.ctx.release(&matrix);
        self.ctx.release(&column);
        let product = product?;
        let out = self.ctx.reshape(&product, &[n]);
        self.ctx.release(&product);
        out
    }

    fn prune(&mut self, now: Instant) {
        let retention = self.config.chain_retention();
        let expired: Vec<ChainId> = self
            .chains
            .values()
            .filter(|c| c.status.is_terminal() && c.idle_for(now) > retention)
            .map(|c| c.id)
            .collect();
        for id in expired {
            if let Some(chain) = self.chains.remove(&id) {
                for tensor in &chain.output_tensors {
                    self.ctx.release(tensor);
                }
                debug!(chain = %id, status = ?chain.status, "reasoning chain pruned");
            }
        }
    }

    /// Statistics over all retained chains; throughput is left at zero.
    pub fn stats(&self) -> ReasoningStats {
        let mut stats = ReasoningStats::default();
        let mut depth = 0;
        let mut confidence = 0.0;
        for chain in self.chains.values() {
            stats.total_chains += 1;
            match chain.status {
                ChainStatus::Active => stats.active_chains += 1,
                ChainStatus::Converged => stats.converged_chains += 1,
                ChainStatus::Diverged => stats.diverged_chains += 1,
                ChainStatus::Terminated => stats.terminated_chains += 1,
            }
            depth += chain.current_depth;
            confidence += chain.confidence_score;
            stats.total_inferences += chain.steps.len();
            stats.tensor_memory_usage += chain.tensor_bytes();
        }
        if stats.total_chains > 0 {
            stats.average_depth = depth as f32 / stats.total_chains as f32;
            stats.average_confidence = confidence / stats.total_chains as f32;
        }
        stats
    }

    pub fn chain(&self, id: ChainId) -> Option<&ReasoningChain> {
        self.chains.get(&id)
    }

    /// Retained chains, oldest first.
    pub fn chains(&self) -> impl Iterator<Item = &ReasoningChain> {
        self.chains.values()
    }

    pub fn history(&self) -> impl Iterator<Item = &ReasoningStep> {
        self.history.iter()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Chains terminated by the most recent step call.
    pub fn last_failures(&self) -> &[ChainFailure] {
        &self.last_failures
    }

    pub fn rules(&self) -> &[InferenceRule] {
        &self.rules
    }

    /// Register a rule, replacing any rule with the same id.
    pub fn add_rule(&mut self, rule: InferenceRule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> Option<InferenceRule> {
        let idx = self.rules.iter().position(|r| r.id == rule_id)?;
        Some(self.rules.remove(idx))
    }

    pub fn config(&self) -> &ReasoningConfig {
        &self.config
    }

    /// Replace the limits. Invalid limits are rejected and the engine is
    /// left untouched.
    pub fn update_config(&mut self, config: ReasoningConfig) -> Result<(), ConfigError> {
        config.validate()?;
        while self.history.len() > config.history_limit {
            self.history.pop_front();
        }
        self.config = config;
        Ok(())
    }

    pub fn set_max_reasoning_depth(&mut self, depth: usize) {
        self.config.max_reasoning_depth = depth;
    }

    /// Drop every chain and the history. Rules are kept.
    pub fn reset(&mut self) {
        for chain in self.chains.values() {
            for tensor in &chain.output_tensors {
                self.ctx.release(tensor);
            }
        }
        self.chains.clear();
        self.history.clear();
        self.last_failures.clear();
    }
}

/// `(1 − |out|/|in|)·factor·0.1`, clamped to `[0, 1]` so confidence never
/// increases.
fn confidence_change(premises: &[KernelTensor], output: &KernelTensor, rule_type: RuleType) -> f32 {
    let input = premises
        .iter()
        .flat_map(|t| t.data.iter())
        .map(|v| v * v)
        .sum::<f32>()
        .sqrt();
    let ratio = output.l2_norm() / (input + 1e-8);
    let change = (1.0 - ratio) * rule_type.confidence_factor() * 0.1;
    if change.is_finite() {
        change.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn attention_consumed(premises: &[KernelTensor]) -> f32 {
    if premises.is_empty() {
        return 0.0;
    }
    let mass: f32 = premises
        .iter()
        .map(|t| t.data.iter().map(|v| v.abs()).sum::<f32>())
        .sum();
    mass / premises.len() as f32
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::atomspace::{Atom, AtomType};
    use crate::config::TensorConfig;
    use crate::encoder::TensorEncoder;

    fn setup(count: usize) -> (TensorEncoder, ReasoningEngine) {
        let ctx = TensorContext::with_seed(11);
        let mut encoder = TensorEncoder::new(&TensorConfig::default(), ctx.clone());
        for i in 0..count {
            encoder.encode_atom(&Atom::new(format!("a{i}"), AtomType::Concept, Some("cat")));
        }
        let engine = ReasoningEngine::new(ReasoningConfig::default(), ctx);
        (encoder, engine)
    }

    #[test]
    fn seed_is_unit_norm() {
        let (encoder, mut engine) = setup(3);
        let chain = engine.start_reasoning_chain(encoder.node_tensors());
        assert_eq!(chain.input_nodes, vec!["a0", "a1", "a2"]);
        assert!((chain.output_tensors[0].l2_norm() - 1.0).abs() < 1e-4);
        assert_eq!(chain.status, ChainStatus::Active);
        assert_eq!(chain.confidence_score, 1.0);
    }

    #[test]
    fn empty_chain_seeds_a_single_zero() {
        let (_, mut engine) = setup(0);
        let chain = engine.start_reasoning_chain(std::iter::empty());
        assert_eq!(chain.output_tensors[0].shape, vec![1]);
    }

    #[test]
    fn no_applicable_rule_converges() {
        let (encoder, mut engine) = setup(1);
        engine.remove_rule("revision");
        let id = engine.start_reasoning_chain(encoder.node_tensors()).id;
        let stats = engine.execute_reasoning_step(encoder.node_tensors(), encoder.link_tensors());
        assert_eq!(engine.chain(id).map(|c| c.status), Some(ChainStatus::Converged));
        assert_eq!(stats.converged_chains, 1);
        assert_eq!(stats.reasoning_throughput, 0.0);
    }

    #[test]
    fn confidence_never_increases_and_depth_is_capped() {
        let (encoder, mut engine) = setup(2);
        let id = engine.start_reasoning_chain(encoder.node_tensors()).id;
        let mut previous = 1.0;
        for _ in 0..10 {
            engine.execute_reasoning_step(encoder.node_tensors(), encoder.link_tensors());
            let chain = engine.chain(id).unwrap();
            assert!(chain.confidence_score <= previous);
            previous = chain.confidence_score;
        }
        let chain = engine.chain(id).unwrap();
        assert!(chain.current_depth <= engine.config().max_reasoning_depth);
        assert_eq!(chain.output_tensors.len(), chain.steps.len() + 1);
    }

    #[test]
    fn two_premise_rule_on_single_seed_does_not_fail() {
        let ctx = TensorContext::with_seed(5);
        let mut encoder = TensorEncoder::new(&TensorConfig::default(), ctx.clone());
        encoder.encode_atom(&Atom::new("solo", AtomType::Concept, None));
        let deduction = default_rules().into_iter().next().unwrap();
        let mut engine = ReasoningEngine::with_rules(ReasoningConfig::default(), ctx, vec![deduction]);
        let id = engine.start_reasoning_chain(encoder.node_tensors()).id;
        engine.execute_reasoning_step(encoder.node_tensors(), encoder.link_tensors());
        let status = engine.chain(id).unwrap().status;
        assert!(matches!(status, ChainStatus::Active | ChainStatus::Converged));
        assert!(engine.last_failures().is_empty());
    }

    #[test]
    fn shape_errors_terminate_only_the_offending_chain() {
        let (encoder, mut engine) = setup(2);
        let broken = engine.start_reasoning_chain(encoder.node_tensors()).id;
        // A second, narrower output makes the two-premise contraction fail.
        let odd = engine.ctx.create(&[3], DType::F32, None, false);
        if let Some(chain) = engine.chains.get_mut(&broken) {
            chain.output_tensors.push(odd);
        }
        engine.rules.retain(|r| r.tensor_operation == TensorOperation::Contraction);
        let healthy = engine.start_reasoning_chain(encoder.node_tensors()).id;

        let stats = engine.execute_reasoning_step(encoder.node_tensors(), encoder.link_tensors());
        assert_eq!(engine.chain(broken).unwrap().status, ChainStatus::Terminated);
        assert_eq!(stats.terminated_chains, 1);
        assert_eq!(engine.last_failures().len(), 1);
        assert_eq!(engine.last_failures()[0].chain_id, broken);
        assert_ne!(engine.chain(healthy).unwrap().status, ChainStatus::Terminated);
    }

    #[test]
    fn terminal_chains_are_pruned_after_retention() {
        let (encoder, mut engine) = setup(1);
        engine.remove_rule("revision");
        let start = Instant::now();
        engine.start_reasoning_chain_at(start, encoder.node_tensors());
        engine.execute_reasoning_step_at(start, encoder.node_tensors(), encoder.link_tensors());
        assert_eq!(engine.stats().total_chains, 1);

        let later = start + engine.config().chain_retention() + Duration::from_secs(1);
        engine.execute_reasoning_step_at(later, encoder.node_tensors(), encoder.link_tensors());
        assert_eq!(engine.stats().total_chains, 0);
    }

    #[test]
    fn every_active_chain_advances_each_step() {
        let (encoder, mut engine) = setup(2);
        assert_eq!(engine.config().parallel_chains, 4);
        for _ in 0..6 {
            engine.start_reasoning_chain(encoder.node_tensors());
        }
        engine.execute_reasoning_step(encoder.node_tensors(), encoder.link_tensors());
        assert_eq!(engine.chains().filter(|c| !c.steps.is_empty()).count(), 6);

        engine
            .update_config(ReasoningConfig {
                parallel_chains: 1,
                ..ReasoningConfig::default()
            })
            .unwrap();
        engine.execute_reasoning_step(encoder.node_tensors(), encoder.link_tensors());
        assert!(engine
            .chains()
            .filter(|c| c.status == ChainStatus::Active)
            .all(|c| c.steps.len() == 2));
    }

    #[test]
    fn invalid_limits_are_rejected() {
        let (_, mut engine) = setup(1);
        let err = engine.update_config(ReasoningConfig {
            parallel_chains: 0,
            ..ReasoningConfig::default()
        });
        assert!(err.is_err());
        assert_eq!(engine.config(), &ReasoningConfig::default());
    }

    #[test]
    fn reset_releases_chain_tensors() {
        let (encoder, mut engine) = setup(2);
        let before = engine.ctx.memory_stats().used_bytes;
        engine.start_reasoning_chain(encoder.node_tensors());
        engine.execute_reasoning_step(encoder.node_tensors(), encoder.link_tensors());
        assert!(engine.ctx.memory_stats().used_bytes > before);
        engine.reset();
        assert_eq!(engine.ctx.memory_stats().used_bytes, before);
        assert_eq!(engine.rules().len(), 4);
    }

    #[test]
    fn add_rule_replaces_by_id() {
        let (_, mut engine) = setup(0);
        let mut revision = engine.rules()[3].clone();
        revision.name = "Revised".into();
        engine.add_rule(revision);
        assert_eq!(engine.rules().len(), 4);
        assert_eq!(engine.rules()[3].name, "Revised");
        assert!(engine.remove_rule("missing").is_none());
    }
}
