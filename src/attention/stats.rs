use serde::Serialize;

use crate::encoder::NodeTensor;
use crate::tensor::gradient::{gradient_norm, rms_norm};

/// Summary of one attention update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AttentionStats {
    pub total_attention: f32,
    pub average_attention: f32,
    /// Shannon entropy (bits) of the normalised weight distribution.
    pub attention_entropy: f32,
    /// `total_attention / resource_budget`.
    pub resource_utilization: f32,
    /// Root-mean-square of per-node gradient L2 norms.
    pub gradient_norm: f32,
    /// `exp(-gradient_norm)`.
    pub convergence_rate: f32,
}

impl AttentionStats {
    /// Compute statistics from the current node weights.
    pub fn from_nodes(nodes: &[NodeTensor], resource_budget: f32) -> Self {
        if nodes.is_empty() {
            return Self::default();
        }

        let weights: Vec<f32> = nodes.iter().map(NodeTensor::weight).collect();
        let total: f32 = weights.iter().sum();
        let norms: Vec<f32> = nodes
            .iter()
            .filter_map(|node| node.attention_weights.gradient.as_deref())
            .map(gradient_norm)
            .collect();
        let grad = rms_norm(&norms);

        Self {
            total_attention: total,
            average_attention: total / nodes.len() as f32,
            attention_entropy: entropy_bits(&weights, total),
            resource_utilization: if resource_budget > 0.0 {
                total / resource_budget
            } else {
                0.0
            },
            gradient_norm: grad,
            convergence_rate: (-grad).exp(),
        }
    }

    /// Element-wise mean of two stats records.
    pub fn average(&self, other: &Self) -> Self {
        Self {
            total_attention: (self.total_attention + other.total_attention) / 2.0,
            average_attention: (self.average_attention + other.average_attention) / 2.0,
            attention_entropy: (self.attention_entropy + other.attention_entropy) / 2.0,
            resource_utilization: (self.resource_utilization + other.resource_utilization) / 2.0,
            gradient_norm: (self.gradient_norm + other.gradient_norm) / 2.0,
            convergence_rate: (self.convergence_rate + other.convergence_rate) / 2.0,
        }
    }

    /// Rescale the weight-proportional fields after budget enforcement.
    pub(crate) fn scaled(mut self, factor: f32) -> Self {
        self.total_attention *= factor;
        self.average_attention *= factor;
        self.resource_utilization *= factor;
        self
    }
}

fn entropy_bits(weights: &[f32], total: f32) -> f32 {
    if total <= 0.0 {
        return 0.0;
    }
    weights
        .iter()
        .map(|w| w / total)
        .filter(|p| *p > 0.0)
        .map(|p| -p * p.log2())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_distribution_has_log2_n_entropy() {
        let weights = [0.25; 4];
        assert!((entropy_bits(&weights, 1.0) - 2.0).abs() < 1e-6);
        assert_eq!(entropy_bits(&[1.0, 0.0], 1.0), 0.0);
        assert_eq!(entropy_bits(&[], 0.0), 0.0);
    }

    #[test]
    fn average_is_element_wise() {
        let a = AttentionStats {
            total_attention: 2.0,
            gradient_norm: 1.0,
            ..AttentionStats::default()
        };
        let b = AttentionStats::default();
        let avg = a.average(&b);
        assert_eq!(avg.total_attention, 1.0);
        assert_eq!(avg.gradient_norm, 0.5);
    }
}
