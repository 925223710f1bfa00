//! Attention allocation over encoded nodes and links.
//!
//! One [`AttentionEngine`] holds the kernel's global attention record: the
//! resource budget, the mechanism parameters and a rolling log of transfers.
//! An effective update runs, in order:
//!
//! 1. the configured mechanism (softmax, economic or hybrid),
//! 2. gradient correction of every node's attention weights,
//! 3. budget enforcement so that `Σ weight ≤ resource_budget`,
//! 4. pruning of the flow log.
//!
//! Updates arriving faster than `update_frequency` allows are debounced: the
//! engine returns the stats of the last effective update and touches nothing.

pub mod flow;
pub mod stats;

use std::collections::HashMap;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::{AttentionConfig, AttentionMechanism, ConfigError};
use crate::encoder::tensors::{SMOOTHED_SLOT, WEIGHT_SLOT};
use crate::encoder::{LinkTensor, NodeTensor};
use crate::logging::timestamp_ms;
use crate::tensor::gradient::{apply_gradient, clip_to_norm, rms_norm};
use crate::tensor::operations::softmax_slice;
use crate::tensor::KernelTensor;

pub use flow::{AttentionFlow, FlowReason, BANK_ID, FLOW_WINDOW, MAX_FLOWS};
pub use stats::AttentionStats;

use flow::FlowLog;

#[derive(Debug)]
pub struct AttentionEngine {
    config: AttentionConfig,
    resource_budget: f32,
    flows: FlowLog,
    last_update: Option<Instant>,
    last_stats: AttentionStats,
    effective_updates: u64,
}

impl AttentionEngine {
    pub fn new(config: AttentionConfig) -> Self {
        Self {
            resource_budget: config.resource_budget,
            config,
            flows: FlowLog::default(),
            last_update: None,
            last_stats: AttentionStats::default(),
            effective_updates: 0,
        }
    }

    pub fn update_attention_allocation(
        &mut self,
        nodes: &mut [NodeTensor],
        links: &mut [LinkTensor],
    ) -> AttentionStats {
        self.update_attention_allocation_at(Instant::now(), nodes, links)
    }

    /// Same as [`update_attention_allocation`](Self::update_attention_allocation)
    /// with an explicit clock reading.
    pub fn update_attention_allocation_at(
        &mut self,
        now: Instant,
        nodes: &mut [NodeTensor],
        links: &mut [LinkTensor],
    ) -> AttentionStats {
        if let Some(last) = self.last_update {
            if now.saturating_duration_since(last) < self.config.update_interval() {
                return self.last_stats;
            }
        }

        let mut stats = match self.config.mechanism {
            AttentionMechanism::Softmax => self.apply_softmax(nodes, links),
            AttentionMechanism::Economic => self.apply_economic(now, nodes, links),
            AttentionMechanism::Hybrid => {
                let softmax = self.apply_softmax(nodes, links);
                let economic = self.apply_economic(now, nodes, links);
                softmax.average(&economic)
            }
        };

        let grad = self.apply_gradient_correction(nodes);
        stats.gradient_norm = grad;
        stats.convergence_rate = (-grad).exp();

        let factor = self.enforce_budget(nodes);
        if factor < 1.0 {
            stats = stats.scaled(factor);
        }

        self.flows.prune(now);
        self.last_update = Some(now);
        self.last_stats = stats;
        self.effective_updates += 1;
        debug!(
            mechanism = ?self.config.mechanism,
            total = stats.total_attention,
            entropy = stats.attention_entropy,
            budget = self.resource_budget,
            "attention updated"
        );
        stats
    }

    fn apply_softmax(&mut self, nodes: &mut [NodeTensor], links: &mut [LinkTensor]) -> AttentionStats {
        if nodes.is_empty() {
            return AttentionStats::from_nodes(nodes, self.resource_budget);
        }

        let temperature = self.config.temperature;
        let logits: Vec<f32> = nodes
            .iter()
            .map(|node| {
                let depth = node.metadata.symbolic_depth as f32;
                let dof = node.metadata.degree_of_freedom as f32;
                (node.truth_product()
                    + 0.5 * node.weight()
                    + 0.1 * (depth + 1.0).ln()
                    + 0.05 * (dof + 1.0).ln())
                    / temperature
            })
            .collect();
        let weights = softmax_slice(&logits);

        let decay = self.config.decay_rate;
        nodes
            .par_iter_mut()
            .zip(weights.par_iter())
            .for_each(|(node, &weight)| {
                let smoothed = node.smoothed_weight() * (1.0 - decay) + weight * decay;
                node.attention_weights.set(WEIGHT_SLOT, weight);
                node.attention_weights.set(SMOOTHED_SLOT, smoothed);
            });

        update_link_attention(nodes, links);
        AttentionStats::from_nodes(nodes, self.resource_budget)
    }

    fn apply_economic(
        &mut self,
        now: Instant,
        nodes: &mut [NodeTensor],
        links: &mut [LinkTensor],
    ) -> AttentionStats {
        let stamp = timestamp_ms();
        let rent_rate = self.config.rent_rate;

        let mut total_rent = 0.0;
        for node in nodes.iter_mut() {
            let sti = node.weight().max(0.0);
            let rent = sti * rent_rate;
            total_rent += rent;
            node.set_weight((sti - rent).max(0.0));
            if rent > 0.0 {
                self.flows.record(
                    now,
                    AttentionFlow {
                        timestamp_ms: stamp,
                        source_id: node.atom_id.clone(),
                        target_id: BANK_ID.to_string(),
                        transfer: rent,
                        reason: FlowReason::Rent,
                    },
                );
            }
        }

        let wage_pool = total_rent * self.config.wage_rate;
        let importance: Vec<f32> = nodes
            .iter()
            .map(|node| {
                let depth = node.metadata.symbolic_depth as f32;
                0.4 * node.truth_product() + 0.3 * node.weight() + 0.3 * (depth + 1.0).ln()
            })
            .collect();
        let total_importance: f32 = importance.iter().sum();
        if total_importance > 0.0 && wage_pool > 0.0 {
            for (node, score) in nodes.iter_mut().zip(&importance) {
                let wage = score / total_importance * wage_pool;
                node.set_weight(node.weight() + wage);
                self.flows.record(
                    now,
                    AttentionFlow {
                        timestamp_ms: stamp,
                        source_id: BANK_ID.to_string(),
                        target_id: node.atom_id.clone(),
                        transfer: wage,
                        reason: FlowReason::Wage,
                    },
                );
            }
        }

        self.diffuse(now, stamp, nodes, links);
        self.resource_budget = (self.resource_budget - total_rent + wage_pool).max(0.0);

        AttentionStats::from_nodes(nodes, self.resource_budget)
    }

    /// Move attention from sources toward targets along every link,
    /// proportional to the weight gap and the link's truth strength.
    fn diffuse(&mut self, now: Instant, stamp: u128, nodes: &mut [NodeTensor], links: &[LinkTensor]) {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.atom_id.clone(), i))
            .collect();
        let rate = self.config.diffusion_rate;

        for link in links {
            let strength = link.strength();
            for source_id in &link.source_nodes {
                let Some(&s) = index.get(source_id) else {
                    continue;
                };
                for target_id in &link.target_nodes {
                    let Some(&t) = index.get(target_id) else {
                        continue;
                    };
                    if s == t {
                        continue;
                    }
                    let amount = (nodes[s].weight() - nodes[t].weight()) * rate * strength;
                    nodes[s].set_weight(nodes[s].weight() - amount * 0.5);
                    nodes[t].set_weight(nodes[t].weight() + amount * 0.5);
                    self.flows.record(
                        now,
                        AttentionFlow {
                            timestamp_ms: stamp,
                            source_id: source_id.clone(),
                            target_id: target_id.clone(),
                            transfer: amount,
                            reason: FlowReason::Diffusion,
                        },
                    );
                }
            }
        }
    }

    /// Pull each node's working weight toward its smoothed weight, clipping the
    /// gradient and flooring all slots at zero. Returns the RMS gradient norm.
    fn apply_gradient_correction(&self, nodes: &mut [NodeTensor]) -> f32 {
        let clip = self.config.gradient_clipping;
        let lr = self.config.learning_rate;
        let norms: Vec<f32> = nodes
            .par_iter_mut()
            .map(|node| {
                let KernelTensor { data, gradient, .. } = &mut node.attention_weights;
                let gradient = gradient.get_or_insert_with(|| vec![0.0; data.len()]);
                gradient.iter_mut().for_each(|g| *g = 0.0);
                if let Some(first) = gradient.first_mut() {
                    let weight = data.get(WEIGHT_SLOT).copied().unwrap_or(0.0);
                    let smoothed = data.get(SMOOTHED_SLOT).copied().unwrap_or(0.0);
                    *first = weight - smoothed;
                }
                clip_to_norm(gradient, clip);
                apply_gradient(data, gradient, lr);
                data.iter_mut().for_each(|v| *v = v.max(0.0));
                gradient.iter().map(|g| g * g).sum::<f32>().sqrt()
            })
            .collect();
        rms_norm(&norms)
    }

    /// Scale weights down proportionally when they exceed the budget. Returns
    /// the factor applied (1.0 when within budget).
    fn enforce_budget(&self, nodes: &mut [NodeTensor]) -> f32 {
        let total: f32 = nodes.iter().map(NodeTensor::weight).sum();
        if total <= self.resource_budget || total <= 0.0 {
            return 1.0;
        }
        let factor = self.resource_budget / total;
        warn!(
            total,
            budget = self.resource_budget,
            factor,
            "attention over budget, scaling down"
        );
        nodes
            .par_iter_mut()
            .for_each(|node| node.set_weight(node.weight() * factor));
        factor
    }

    /// Statistics of the current weights without running an update.
    pub fn current_stats(&self, nodes: &[NodeTensor]) -> AttentionStats {
        AttentionStats::from_nodes(nodes, self.resource_budget)
    }

    pub fn last_stats(&self) -> AttentionStats {
        self.last_stats
    }

    /// Recorded transfers from the last minute, oldest first.
    pub fn flows(&self) -> Vec<AttentionFlow> {
        self.flows.flows().cloned().collect()
    }

    pub fn resource_budget(&self) -> f32 {
        self.resource_budget
    }

    pub fn effective_updates(&self) -> u64 {
        self.effective_updates
    }

    pub fn config(&self) -> &AttentionConfig {
        &self.config
    }

    /// Replace the parameters. The current budget is kept. Invalid
    /// parameters are rejected and the engine is left untouched.
    pub fn update_config(&mut self, config: AttentionConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_update_frequency(&mut self, frequency_hz: f32) -> Result<(), ConfigError> {
        let config = AttentionConfig {
            update_frequency: frequency_hz,
            ..self.config.clone()
        };
        self.update_config(config)
    }

    /// Restore the configured budget and forget flows and debounce state.
    pub fn reset(&mut self) {
        self.resource_budget = self.config.resource_budget;
        self.flows.clear();
        self.last_update = None;
        self.last_stats = AttentionStats::default();
        self.effective_updates = 0;
    }
}

/// Set each link's weight to the mean of its endpoints' weights.
fn update_link_attention(nodes: &[NodeTensor], links: &mut [LinkTensor]) {
    let weights: HashMap<&str, f32> = nodes
        .iter()
        .map(|node| (node.atom_id.as_str(), node.weight()))
        .collect();
    links.par_iter_mut().for_each(|link| {
        let (sum, count) = link
            .endpoints()
            .filter_map(|id| weights.get(id))
            .fold((0.0, 0usize), |(sum, count), w| (sum + w, count + 1));
        if count > 0 {
            link.set_weight(sum / count as f32);
        }
    });
}
