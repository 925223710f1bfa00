use serde::Serialize;

use crate::tensor::KernelTensor;

/// Slot of the current attention weight (the node's working STI).
pub const WEIGHT_SLOT: usize = 0;
/// Slot of the exponentially smoothed weight.
pub const SMOOTHED_SLOT: usize = 1;
/// Slot of the very-long-term importance flag.
pub const VLTI_SLOT: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMetadata {
    pub atom_type: String,
    pub symbolic_depth: u32,
    pub degree_of_freedom: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkMetadata {
    pub link_type: String,
    pub arity: usize,
    pub symbolic_depth: u32,
}

/// Tensor form of one atom.
///
/// `attention_weights` is three wide: current weight, smoothed weight and the
/// VLTI flag, and carries a gradient buffer of the same width.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTensor {
    pub atom_id: String,
    pub embedding: KernelTensor,
    pub attention_weights: KernelTensor,
    pub truth_value_tensor: KernelTensor,
    pub symbolic_features: KernelTensor,
    pub metadata: NodeMetadata,
}

impl NodeTensor {
    pub fn weight(&self) -> f32 {
        self.attention_weights.get(WEIGHT_SLOT)
    }

    pub fn set_weight(&mut self, value: f32) {
        self.attention_weights.set(WEIGHT_SLOT, value);
    }

    pub fn smoothed_weight(&self) -> f32 {
        self.attention_weights.get(SMOOTHED_SLOT)
    }

    pub fn strength(&self) -> f32 {
        self.truth_value_tensor.get(0)
    }

    pub fn confidence(&self) -> f32 {
        self.truth_value_tensor.get(1)
    }

    pub fn truth_product(&self) -> f32 {
        self.strength() * self.confidence()
    }

    /// Bytes held by the five tensors of this node.
    pub fn size_bytes(&self) -> usize {
        self.embedding.size_bytes()
            + self.attention_weights.size_bytes()
            + self.truth_value_tensor.size_bytes()
            + self.symbolic_features.size_bytes()
    }

    pub(crate) fn tensors(&self) -> [&KernelTensor; 4] {
        [
            &self.embedding,
            &self.attention_weights,
            &self.truth_value_tensor,
            &self.symbolic_features,
        ]
    }
}

/// Tensor form of one link. `target_nodes` holds the last outgoing id; every
/// other id is a source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkTensor {
    pub link_id: String,
    pub source_nodes: Vec<String>,
    pub target_nodes: Vec<String>,
    pub relation_tensor: KernelTensor,
    pub attention_weights: KernelTensor,
    pub truth_value_tensor: KernelTensor,
    pub metadata: LinkMetadata,
}

impl LinkTensor {
    pub fn weight(&self) -> f32 {
        self.attention_weights.get(WEIGHT_SLOT)
    }

    pub fn set_weight(&mut self, value: f32) {
        self.attention_weights.set(WEIGHT_SLOT, value);
    }

    pub fn strength(&self) -> f32 {
        self.truth_value_tensor.get(0)
    }

    /// Sources followed by targets, in outgoing order.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.source_nodes
            .iter()
            .chain(self.target_nodes.iter())
            .map(String::as_str)
    }

    pub fn size_bytes(&self) -> usize {
        self.relation_tensor.size_bytes()
            + self.attention_weights.size_bytes()
            + self.truth_value_tensor.size_bytes()
    }

    pub(crate) fn tensors(&self) -> [&KernelTensor; 3] {
        [
            &self.relation_tensor,
            &self.attention_weights,
            &self.truth_value_tensor,
        ]
    }
}
