//! Atom/link ⇄ tensor encoding.
//!
//! The [`TensorEncoder`] owns the symbol vocabulary and the id-keyed caches of
//! [`NodeTensor`]s and [`LinkTensor`]s for one kernel. Encoding is idempotent
//! by id: a second call for the same atom returns the cached tensor untouched.
//!
//! Slot layout of a node embedding:
//!
//! | slot | content |
//! |------|---------|
//! | 0 | vocabulary id / 100 |
//! | 1 | (hash(name) mod 1000) / 1000 |
//! | 2.. | Xavier noise |
//!
//! Link relation tensors use slot 1 for arity / 10 and slots 2..7 for the
//! hashes of up to five outgoing ids.
//!
//! Values are stored as given. Out-of-range truth or attention values are not
//! clamped; validating them is the caller's job.
//!
//! Decoding is lossy in two places. Names come back as `decoded_<id>` since
//! only their hash is kept, and an embedding whose type slot does not resolve
//! to a known type decodes to the default type. The second case is reported
//! through [`DecodeConfidence::Fallback`].

pub mod tensors;
pub mod vocabulary;

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::atomspace::{
    now_ms, Atom, AtomType, AtomeseNode, AttentionValue, Link, LinkType, TruthValue,
};
use crate::config::TensorConfig;
use crate::tensor::{DType, KernelTensor, TensorContext};

pub use tensors::{LinkMetadata, LinkTensor, NodeMetadata, NodeTensor};
pub use vocabulary::{hash_symbol, normalized_hash, Vocabulary, VocabularyStats};

const DAY_MS: f32 = 24.0 * 60.0 * 60.0 * 1000.0;
const MAX_HASHED_OUTGOING: usize = 5;

/// Structural failures that prevent a link or atom from being encoded.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum EncodeError {
    #[error("link {link_id} has no outgoing atoms")]
    EmptyOutgoing { link_id: String },
    #[error("{kind} with empty id")]
    EmptyId { kind: &'static str },
}

/// How faithfully a decoded value reflects the encoded type slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecodeConfidence {
    Exact,
    /// The type slot held `type_id`, which did not resolve; the default type
    /// was substituted.
    Fallback { type_id: i64 },
}

/// A decoded value tagged with its [`DecodeConfidence`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decoded<T> {
    pub value: T,
    pub confidence: DecodeConfidence,
}

impl<T> Decoded<T> {
    pub fn is_lossy(&self) -> bool {
        matches!(self.confidence, DecodeConfidence::Fallback { .. })
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Outcome of [`TensorEncoder::encode_batch`]. Successful items are returned
/// even when others failed.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEncoding {
    pub nodes: Vec<NodeTensor>,
    pub links: Vec<LinkTensor>,
    pub errors: Vec<EncodeError>,
    pub success: bool,
}

/// Stateful encoder owning the vocabulary and tensor caches of one kernel.
#[derive(Debug)]
pub struct TensorEncoder {
    ctx: TensorContext,
    node_dim: usize,
    link_dim: usize,
    feature_dim: usize,
    vocabulary: Vocabulary,
    nodes: Vec<NodeTensor>,
    node_index: HashMap<String, usize>,
    links: Vec<LinkTensor>,
    link_index: HashMap<String, usize>,
}

impl TensorEncoder {
    /// Widths are taken from `config`; they are assumed validated
    /// (node ≥ 2, link ≥ 7, features ≥ 5).
    pub fn new(config: &TensorConfig, ctx: TensorContext) -> Self {
        Self {
            ctx,
            node_dim: config.node_embedding_dim,
            link_dim: config.link_embedding_dim,
            feature_dim: config.symbolic_feature_dim,
            vocabulary: Vocabulary::new(),
            nodes: Vec::new(),
            node_index: HashMap::new(),
            links: Vec::new(),
            link_index: HashMap::new(),
        }
    }

    pub fn context(&self) -> &TensorContext {
        &self.ctx
    }

    pub fn node_embedding_dim(&self) -> usize {
        self.node_dim
    }

    fn vector(&self, width: usize, values: &[f32], name: Option<&str>, grad: bool) -> KernelTensor {
        let mut tensor = self.ctx.create(&[width], DType::F32, name, grad);
        for (slot, value) in values.iter().enumerate() {
            tensor.set(slot, *value);
        }
        tensor
    }

    fn truth_tensor(&self, truth: &TruthValue) -> KernelTensor {
        self.vector(3, &encode_truth_value(truth), None, false)
    }

    fn attention_tensor(&self, values: [f32; 3]) -> KernelTensor {
        self.vector(3, &values, None, true)
    }

    fn embedding(&mut self, prefix: &str, id: &str, symbol: &str, name: Option<&str>) -> KernelTensor {
        let type_id = self.vocabulary.insert(symbol);
        let label = format!("{prefix}_{id}");
        let mut embedding = self.ctx.create_random(&[self.node_dim], Some(&label), true);
        embedding.set(0, type_id as f32 / 100.0);
        if let Some(name) = name {
            embedding.set(1, normalized_hash(name));
        }
        embedding
    }

    fn insert_node(&mut self, tensor: NodeTensor) -> &NodeTensor {
        let idx = self.nodes.len();
        self.node_index.insert(tensor.atom_id.clone(), idx);
        self.nodes.push(tensor);
        &self.nodes[idx]
    }

    /// Encode an atom, or return its cached tensor.
    pub fn encode_atom(&mut self, atom: &Atom) -> &NodeTensor {
        if let Some(&idx) = self.node_index.get(&atom.id) {
            return &self.nodes[idx];
        }

        let symbol = atom.atom_type.symbol();
        let name = atom.name.as_deref();
        let embedding = self.embedding("node", &atom.id, symbol, name);
        let age_ms = now_ms().saturating_sub(atom.created_at_ms) as f32;
        let features = [
            symbol.len() as f32 / 20.0,
            name.map_or(0.0, |n| n.chars().count() as f32 / 50.0),
            atom.importance,
            (age_ms / DAY_MS).min(1.0),
        ];

        let depth = 1
            + name.map_or(0, |n| n.split('-').count().min(3) as u32)
            + u32::from(is_relation(symbol));
        let dof = 1 + 2 + 3 + if is_relation(symbol) { 2 } else { 0 };

        let tensor = NodeTensor {
            atom_id: atom.id.clone(),
            embedding,
            attention_weights: self.attention_tensor(encode_attention_value(&atom.attention)),
            truth_value_tensor: self.truth_tensor(&atom.truth),
            symbolic_features: self.vector(self.feature_dim, &features, None, false),
            metadata: NodeMetadata {
                atom_type: symbol.to_string(),
                symbolic_depth: depth,
                degree_of_freedom: dof,
            },
        };
        debug!(atom = %atom.id, depth, "encoded atom");
        self.insert_node(tensor)
    }

    /// Encode a lightweight Atomese node, or return its cached tensor.
    ///
    /// A scalar attention value `a` maps to `[a, 0.8a, a > 0.9]`.
    pub fn encode_atomese_node(&mut self, node: &AtomeseNode) -> &NodeTensor {
        if let Some(&idx) = self.node_index.get(&node.id) {
            return &self.nodes[idx];
        }

        let symbol = node.kind.symbol();
        let name = node.name.as_deref();
        let embedding = self.embedding("atomese", &node.id, symbol, name);
        let truth = node
            .truth_value
            .map(|t| TruthValue::new(t.strength, t.confidence, 0.0));
        let attention = node
            .attention_value
            .map_or([0.0; 3], |a| [a, a * 0.8, if a > 0.9 { 1.0 } else { 0.0 }]);
        let children = node.children.as_ref().map_or(0, Vec::len);
        let features = [
            symbol.len() as f32 / 20.0,
            name.map_or(0.0, |n| n.chars().count() as f32 / 50.0),
            node.attention_value.unwrap_or(0.0),
            truth.map_or(0.0, |t| t.strength),
            children as f32 / 10.0,
        ];
        let depth = 1 + children.min(3) as u32 + u32::from(is_relation(symbol));

        let tensor = NodeTensor {
            atom_id: node.id.clone(),
            embedding,
            attention_weights: self.attention_tensor(attention),
            truth_value_tensor: match truth {
                Some(t) => self.truth_tensor(&t),
                None => self.vector(3, &[], None, false),
            },
            symbolic_features: self.vector(self.feature_dim, &features, None, false),
            metadata: NodeMetadata {
                atom_type: symbol.to_string(),
                symbolic_depth: depth,
                degree_of_freedom: children.max(1) as u32,
            },
        };
        self.insert_node(tensor)
    }

    /// Encode a link, or return its cached tensor.
    ///
    /// Fails only when `outgoing` is empty, since a link without a target has
    /// no tensor form.
    pub fn encode_link(&mut self, link: &Link) -> Result<&LinkTensor, EncodeError> {
        if let Some(&idx) = self.link_index.get(&link.id) {
            return Ok(&self.links[idx]);
        }
        let Some((target, sources)) = link.outgoing.split_last() else {
            return Err(EncodeError::EmptyOutgoing {
                link_id: link.id.clone(),
            });
        };

        let symbol = link.link_type.symbol();
        let type_id = self.vocabulary.insert(symbol);
        let label = format!("link_{}", link.id);
        let mut relation = self.ctx.create_random(&[self.link_dim], Some(&label), true);
        relation.set(0, type_id as f32 / 100.0);
        relation.set(1, link.arity() as f32 / 10.0);
        for (i, atom_id) in link.outgoing.iter().take(MAX_HASHED_OUTGOING).enumerate() {
            relation.set(2 + i, normalized_hash(atom_id));
        }

        let tensor = LinkTensor {
            link_id: link.id.clone(),
            source_nodes: sources.to_vec(),
            target_nodes: vec![target.clone()],
            relation_tensor: relation,
            attention_weights: self.attention_tensor(encode_attention_value(&link.attention)),
            truth_value_tensor: self.truth_tensor(&link.truth),
            metadata: LinkMetadata {
                link_type: symbol.to_string(),
                arity: link.arity(),
                symbolic_depth: 1 + link.arity().min(3) as u32,
            },
        };

        let idx = self.links.len();
        self.link_index.insert(link.id.clone(), idx);
        self.links.push(tensor);
        Ok(&self.links[idx])
    }

    /// Encode atoms then links, skipping and reporting the ones that fail.
    pub fn encode_batch(&mut self, atoms: &[Atom], links: &[Link]) -> BatchEncoding {
        let mut errors = Vec::new();
        let mut nodes = Vec::with_capacity(atoms.len());
        for atom in atoms {
            if atom.id.is_empty() {
                errors.push(EncodeError::EmptyId { kind: "atom" });
                continue;
            }
            nodes.push(self.encode_atom(atom).clone());
        }

        let mut encoded_links = Vec::with_capacity(links.len());
        for link in links {
            if link.id.is_empty() {
                errors.push(EncodeError::EmptyId { kind: "link" });
                continue;
            }
            match self.encode_link(link) {
                Ok(tensor) => encoded_links.push(tensor.clone()),
                Err(err) => {
                    warn!(error = %err, "skipping link in batch");
                    errors.push(err);
                }
            }
        }

        BatchEncoding {
            nodes,
            links: encoded_links,
            success: errors.is_empty(),
            errors,
        }
    }

    /// Rebuild an atom from its tensor form. See the module docs for what is
    /// lost.
    pub fn decode_atom(&self, tensor: &NodeTensor) -> Decoded<Atom> {
        let raw_id = (tensor.embedding.get(0) * 100.0).round() as i64;
        let resolved = u32::try_from(raw_id)
            .ok()
            .and_then(|id| self.vocabulary.symbol(id))
            .and_then(AtomType::from_symbol);
        let (atom_type, confidence) = match resolved {
            Some(t) => (t, DecodeConfidence::Exact),
            None => {
                warn!(atom = %tensor.atom_id, type_id = raw_id, "unknown atom type id, decoding as ConceptNode");
                (
                    AtomType::Concept,
                    DecodeConfidence::Fallback { type_id: raw_id },
                )
            }
        };

        let truth = decode_truth_value(&tensor.truth_value_tensor);
        Decoded {
            value: Atom {
                id: tensor.atom_id.clone(),
                atom_type,
                name: Some(format!("decoded_{}", tensor.atom_id)),
                truth,
                attention: decode_attention_value(&tensor.attention_weights),
                importance: truth.product(),
                created_at_ms: now_ms(),
            },
            confidence,
        }
    }

    /// Rebuild a link from its tensor form; unknown types decode as
    /// `InheritanceLink`.
    pub fn decode_link(&self, tensor: &LinkTensor) -> Decoded<Link> {
        let raw_id = (tensor.relation_tensor.get(0) * 100.0).round() as i64;
        let resolved = u32::try_from(raw_id)
            .ok()
            .and_then(|id| self.vocabulary.symbol(id))
            .filter(|symbol| AtomType::from_symbol(symbol).is_none())
            .map(LinkType::from_symbol);
        let (link_type, confidence) = match resolved {
            Some(t) => (t, DecodeConfidence::Exact),
            None => {
                warn!(link = %tensor.link_id, type_id = raw_id, "unknown link type id, decoding as InheritanceLink");
                (
                    LinkType::Inheritance,
                    DecodeConfidence::Fallback { type_id: raw_id },
                )
            }
        };

        Decoded {
            value: Link {
                id: tensor.link_id.clone(),
                link_type,
                outgoing: tensor.endpoints().map(str::to_string).collect(),
                truth: decode_truth_value(&tensor.truth_value_tensor),
                attention: decode_attention_value(&tensor.attention_weights),
            },
            confidence,
        }
    }

    pub fn node(&self, atom_id: &str) -> Option<&NodeTensor> {
        self.node_index.get(atom_id).map(|&idx| &self.nodes[idx])
    }

    pub fn link(&self, link_id: &str) -> Option<&LinkTensor> {
        self.link_index.get(link_id).map(|&idx| &self.links[idx])
    }

    /// Cached node tensors in encoding order.
    pub fn node_tensors(&self) -> &[NodeTensor] {
        &self.nodes
    }

    /// Cached link tensors in encoding order.
    pub fn link_tensors(&self) -> &[LinkTensor] {
        &self.links
    }

    /// Mutable access to both caches, handed to the attention engine.
    pub fn tensors_mut(&mut self) -> (&mut [NodeTensor], &mut [LinkTensor]) {
        (&mut self.nodes, &mut self.links)
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn vocabulary_stats(&self) -> VocabularyStats {
        self.vocabulary.stats()
    }

    /// Drop every cached tensor and return its memory to the context. The
    /// vocabulary is kept.
    pub fn clear_cache(&mut self) {
        for node in &self.nodes {
            for tensor in node.tensors() {
                self.ctx.release(tensor);
            }
        }
        for link in &self.links {
            for tensor in link.tensors() {
                self.ctx.release(tensor);
            }
        }
        self.nodes.clear();
        self.node_index.clear();
        self.links.clear();
        self.link_index.clear();
    }

    /// Clear caches and reseed the vocabulary.
    pub fn reset(&mut self) {
        self.clear_cache();
        self.vocabulary = Vocabulary::new();
    }
}

fn is_relation(symbol: &str) -> bool {
    symbol.contains("Link")
}

/// `[strength, confidence, ln(count + 1) / 10]`.
pub fn encode_truth_value(truth: &TruthValue) -> [f32; 3] {
    [
        truth.strength,
        truth.confidence,
        (truth.count + 1.0).ln() / 10.0,
    ]
}

pub fn decode_truth_value(tensor: &KernelTensor) -> TruthValue {
    TruthValue {
        strength: tensor.get(0),
        confidence: tensor.get(1),
        count: (tensor.get(2) * 10.0).exp() - 1.0,
    }
}

/// `[sti / 100, lti / 100, vlti as 0 or 1]`.
pub fn encode_attention_value(attention: &AttentionValue) -> [f32; 3] {
    [
        attention.sti / 100.0,
        attention.lti / 100.0,
        if attention.vlti { 1.0 } else { 0.0 },
    ]
}

pub fn decode_attention_value(tensor: &KernelTensor) -> AttentionValue {
    AttentionValue {
        sti: tensor.get(0) * 100.0,
        lti: tensor.get(1) * 100.0,
        vlti: tensor.get(2) > 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomspace::{AtomeseKind, SimpleTruth};

    fn encoder() -> TensorEncoder {
        TensorEncoder::new(&TensorConfig::default(), TensorContext::with_seed(11))
    }

    fn atom(id: &str, name: &str) -> Atom {
        Atom::new(id, AtomType::Predicate, Some(name))
            .with_truth(TruthValue::new(0.8, 0.6, 4.0))
            .with_attention(AttentionValue::new(42.0, 7.0, true))
            .with_importance(0.3)
    }

    #[test]
    fn encode_atom_fills_documented_slots() {
        let mut enc = encoder();
        let node = enc.encode_atom(&atom("a1", "likes-red-apples"));
        assert!((node.embedding.get(0) - 0.01).abs() < 1e-6);
        assert!((node.embedding.get(1) - normalized_hash("likes-red-apples")).abs() < 1e-6);
        assert_eq!(node.embedding.shape, vec![128]);
        assert_eq!(node.truth_value_tensor.data[..2], [0.8, 0.6]);
        assert!((node.truth_value_tensor.get(2) - 5.0f32.ln() / 10.0).abs() < 1e-6);
        assert_eq!(node.attention_weights.data, vec![0.42, 0.07, 1.0]);
        assert!(node.attention_weights.tracks_gradient());
        assert!((node.symbolic_features.get(0) - 13.0 / 20.0).abs() < 1e-6);
        assert!((node.symbolic_features.get(2) - 0.3).abs() < 1e-6);
        assert_eq!(node.metadata.symbolic_depth, 4);
        assert_eq!(node.metadata.degree_of_freedom, 6);
    }

    #[test]
    fn encode_atom_is_idempotent_by_id() {
        let mut enc = encoder();
        let first = enc.encode_atom(&atom("a1", "x")).embedding.id;
        let second = enc.encode_atom(&atom("a1", "changed")).embedding.id;
        assert_eq!(first, second);
        assert_eq!(enc.node_tensors().len(), 1);
    }

    #[test]
    fn out_of_range_values_are_stored_as_is() {
        let mut enc = encoder();
        let wild = Atom::new("w", AtomType::Concept, None)
            .with_truth(TruthValue::new(3.5, -1.0, 0.0))
            .with_attention(AttentionValue::new(-250.0, 0.0, false));
        let node = enc.encode_atom(&wild);
        assert_eq!(node.truth_value_tensor.get(0), 3.5);
        assert_eq!(node.truth_value_tensor.get(1), -1.0);
        assert_eq!(node.weight(), -2.5);
    }

    #[test]
    fn atom_round_trip_preserves_truth_and_attention() {
        let mut enc = encoder();
        let original = atom("a1", "x");
        let node = enc.encode_atom(&original).clone();
        let decoded = enc.decode_atom(&node);
        assert!(!decoded.is_lossy());
        let back = decoded.into_inner();
        assert_eq!(back.atom_type, AtomType::Predicate);
        assert!((back.truth.strength - 0.8).abs() < 1e-2);
        assert!((back.truth.confidence - 0.6).abs() < 1e-2);
        assert!((back.truth.count - 4.0).abs() < 1e-2);
        assert!((back.attention.sti - 42.0).abs() < 1e-2);
        assert!(back.attention.vlti);
    }

    #[test]
    fn unknown_type_id_is_flagged_as_fallback() {
        let mut enc = encoder();
        let mut node = enc.encode_atom(&atom("a1", "x")).clone();
        node.embedding.set(0, 0.99);
        let decoded = enc.decode_atom(&node);
        assert_eq!(decoded.value.atom_type, AtomType::Concept);
        assert_eq!(
            decoded.confidence,
            DecodeConfidence::Fallback { type_id: 99 }
        );

        // A relation symbol in a node slot does not resolve to an atom type.
        node.embedding.set(0, 0.05);
        assert!(enc.decode_atom(&node).is_lossy());
    }

    #[test]
    fn link_encodes_arity_and_endpoint_hashes() {
        let mut enc = encoder();
        let link = Link::new("l1", LinkType::Implication, ["a", "b", "c"])
            .with_truth(TruthValue::new(0.9, 0.5, 1.0));
        let tensor = enc.encode_link(&link).unwrap();
        assert!((tensor.relation_tensor.get(0) - 0.06).abs() < 1e-6);
        assert!((tensor.relation_tensor.get(1) - 0.3).abs() < 1e-6);
        assert!((tensor.relation_tensor.get(4) - normalized_hash("c")).abs() < 1e-6);
        assert_eq!(tensor.source_nodes, vec!["a", "b"]);
        assert_eq!(tensor.target_nodes, vec!["c"]);
        assert_eq!(tensor.metadata.symbolic_depth, 4);

        let tensor = tensor.clone();
        let back = enc.decode_link(&tensor);
        assert!(!back.is_lossy());
        assert_eq!(back.value.link_type, LinkType::Implication);
        assert_eq!(back.value.outgoing, vec!["a", "b", "c"]);
    }

    #[test]
    fn custom_link_types_extend_the_vocabulary() {
        let mut enc = encoder();
        let link = Link::new("l1", LinkType::Custom("MemberLink".into()), ["a", "b"]);
        let tensor = enc.encode_link(&link).unwrap().clone();
        assert_eq!(enc.vocabulary_stats().size, 14);
        let back = enc.decode_link(&tensor).into_inner();
        assert_eq!(back.link_type, LinkType::Custom("MemberLink".into()));
    }

    #[test]
    fn batch_reports_partial_failures() {
        let mut enc = encoder();
        let atoms = vec![atom("a", "x"), atom("b", "y")];
        let links = vec![
            Link::new("good", LinkType::Similarity, ["a", "b"]),
            Link::new("bad", LinkType::List, Vec::<String>::new()),
        ];
        let batch = enc.encode_batch(&atoms, &links);
        assert!(!batch.success);
        assert_eq!(batch.nodes.len(), 2);
        assert_eq!(batch.links.len(), 1);
        assert_eq!(
            batch.errors,
            vec![EncodeError::EmptyOutgoing {
                link_id: "bad".into()
            }]
        );
    }

    #[test]
    fn atomese_nodes_approximate_lti() {
        let mut enc = encoder();
        let node = AtomeseNode {
            id: "n1".into(),
            kind: AtomeseKind::EvaluationLink,
            name: Some("eval".into()),
            children: Some(vec!["a".into(), "b".into()]),
            attention_value: Some(0.95),
            truth_value: Some(SimpleTruth {
                strength: 0.7,
                confidence: 0.4,
            }),
        };
        let tensor = enc.encode_atomese_node(&node);
        assert!((tensor.attention_weights.get(1) - 0.76).abs() < 1e-6);
        assert_eq!(tensor.attention_weights.get(2), 1.0);
        assert_eq!(tensor.metadata.symbolic_depth, 4);
        assert_eq!(tensor.metadata.degree_of_freedom, 2);
        assert!((tensor.symbolic_features.get(4) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn clear_cache_releases_memory() {
        let mut enc = encoder();
        enc.encode_atom(&atom("a", "x"));
        enc.encode_link(&Link::new("l", LinkType::List, ["a"]))
            .unwrap();
        assert!(enc.context().memory_stats().used_bytes > 0);
        enc.clear_cache();
        assert_eq!(enc.context().memory_stats().used_bytes, 0);
        assert!(enc.node("a").is_none());
        assert_eq!(enc.vocabulary_stats().size, 13);
    }
}
