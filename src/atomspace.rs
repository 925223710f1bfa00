//! Hypergraph data model consumed by the encoder.
//!
//! Atoms and links are created by the host and handed to the kernel
//! read-only. Their type symbols follow the Atomese naming convention
//! (`ConceptNode`, `InheritanceLink`, ...), which is also the key space of
//! the encoder vocabulary.

use std::fmt::{self, Display};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Probabilistic belief triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthValue {
    /// Expected in `[0, 1]`; not enforced.
    pub strength: f32,
    /// Expected in `[0, 1]`; not enforced.
    pub confidence: f32,
    /// Evidence count, expected `>= 0`.
    pub count: f32,
}

impl TruthValue {
    pub fn new(strength: f32, confidence: f32, count: f32) -> Self {
        Self {
            strength,
            confidence,
            count,
        }
    }

    /// `strength * confidence`, the "truth product" used by attention scoring.
    pub fn product(&self) -> f32 {
        self.strength * self.confidence
    }
}

impl Default for TruthValue {
    fn default() -> Self {
        Self::new(0.5, 0.5, 0.0)
    }
}

/// Short-, long- and very-long-term importance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AttentionValue {
    pub sti: f32,
    pub lti: f32,
    pub vlti: bool,
}

impl AttentionValue {
    pub fn new(sti: f32, lti: f32, vlti: bool) -> Self {
        Self { sti, lti, vlti }
    }
}

/// Node types accepted for atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtomType {
    Concept,
    Predicate,
    Number,
    Variable,
}

impl AtomType {
    pub const ALL: [AtomType; 4] = [
        AtomType::Concept,
        AtomType::Predicate,
        AtomType::Number,
        AtomType::Variable,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            AtomType::Concept => "ConceptNode",
            AtomType::Predicate => "PredicateNode",
            AtomType::Number => "NumberNode",
            AtomType::Variable => "VariableNode",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.symbol() == symbol)
    }
}

impl Display for AtomType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Relation types accepted for links. `Custom` extends the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    Inheritance,
    Similarity,
    Implication,
    Evaluation,
    List,
    Set,
    And,
    Or,
    Not,
    Custom(String),
}

impl LinkType {
    pub const BUILTIN: [LinkType; 9] = [
        LinkType::Inheritance,
        LinkType::Similarity,
        LinkType::Implication,
        LinkType::Evaluation,
        LinkType::List,
        LinkType::Set,
        LinkType::And,
        LinkType::Or,
        LinkType::Not,
    ];

    pub fn symbol(&self) -> &str {
        match self {
            LinkType::Inheritance => "InheritanceLink",
            LinkType::Similarity => "SimilarityLink",
            LinkType::Implication => "ImplicationLink",
            LinkType::Evaluation => "EvaluationLink",
            LinkType::List => "ListLink",
            LinkType::Set => "SetLink",
            LinkType::And => "AndLink",
            LinkType::Or => "OrLink",
            LinkType::Not => "NotLink",
            LinkType::Custom(symbol) => symbol,
        }
    }

    /// Maps a symbol back to a link type. Unknown symbols become `Custom`.
    pub fn from_symbol(symbol: &str) -> Self {
        Self::BUILTIN
            .iter()
            .find(|t| t.symbol() == symbol)
            .cloned()
            .unwrap_or_else(|| LinkType::Custom(symbol.to_string()))
    }
}

impl Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A typed knowledge unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub id: String,
    pub atom_type: AtomType,
    pub name: Option<String>,
    pub truth: TruthValue,
    pub attention: AttentionValue,
    /// Derived ranking hint; the kernel never treats it as authoritative.
    pub importance: f32,
    pub created_at_ms: u64,
}

impl Atom {
    /// New concept-style atom stamped with the current wall clock.
    pub fn new(id: impl Into<String>, atom_type: AtomType, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            atom_type,
            name: name.map(str::to_string),
            truth: TruthValue::default(),
            attention: AttentionValue::default(),
            importance: 0.0,
            created_at_ms: now_ms(),
        }
    }

    pub fn with_truth(mut self, truth: TruthValue) -> Self {
        self.truth = truth;
        self
    }

    pub fn with_attention(mut self, attention: AttentionValue) -> Self {
        self.attention = attention;
        self
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance;
        self
    }
}

/// A typed relation over an ordered list of atom ids.
///
/// The last element of `outgoing` is the target; all preceding elements are
/// sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub link_type: LinkType,
    pub outgoing: Vec<String>,
    pub truth: TruthValue,
    pub attention: AttentionValue,
}

impl Link {
    pub fn new<I, S>(id: impl Into<String>, link_type: LinkType, outgoing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            link_type,
            outgoing: outgoing.into_iter().map(Into::into).collect(),
            truth: TruthValue::default(),
            attention: AttentionValue::default(),
        }
    }

    pub fn with_truth(mut self, truth: TruthValue) -> Self {
        self.truth = truth;
        self
    }

    pub fn with_attention(mut self, attention: AttentionValue) -> Self {
        self.attention = attention;
        self
    }

    pub fn arity(&self) -> usize {
        self.outgoing.len()
    }

    pub fn sources(&self) -> &[String] {
        match self.outgoing.split_last() {
            Some((_, sources)) => sources,
            None => &[],
        }
    }

    pub fn target(&self) -> Option<&str> {
        self.outgoing.last().map(String::as_str)
    }
}

/// Kinds accepted in the lightweight Atomese form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtomeseKind {
    ConceptNode,
    PredicateNode,
    ListLink,
    InheritanceLink,
    EvaluationLink,
    AttentionValue,
}

impl AtomeseKind {
    pub fn symbol(self) -> &'static str {
        match self {
            AtomeseKind::ConceptNode => "ConceptNode",
            AtomeseKind::PredicateNode => "PredicateNode",
            AtomeseKind::ListLink => "ListLink",
            AtomeseKind::InheritanceLink => "InheritanceLink",
            AtomeseKind::EvaluationLink => "EvaluationLink",
            AtomeseKind::AttentionValue => "AttentionValue",
        }
    }
}

/// Strength/confidence pair carried by Atomese nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimpleTruth {
    pub strength: f32,
    pub confidence: f32,
}

/// Loosely structured Atomese node, as emitted by symbolic front ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomeseNode {
    pub id: String,
    pub kind: AtomeseKind,
    pub name: Option<String>,
    #[serde(default)]
    pub children: Option<Vec<String>>,
    #[serde(default)]
    pub attention_value: Option<f32>,
    #[serde(default)]
    pub truth_value: Option<SimpleTruth>,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
