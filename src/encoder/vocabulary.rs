use std::collections::HashMap;

use serde::Serialize;

/// Type symbols seeded into every vocabulary, in id order.
pub const SEED_SYMBOLS: [&str; 13] = [
    "ConceptNode",
    "PredicateNode",
    "NumberNode",
    "VariableNode",
    "InheritanceLink",
    "SimilarityLink",
    "ImplicationLink",
    "EvaluationLink",
    "ListLink",
    "SetLink",
    "AndLink",
    "OrLink",
    "NotLink",
];

/// Growing symbol ⇄ id map. Ids are dense and assigned in insertion order.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    forward: HashMap<String, u32>,
    reverse: Vec<String>,
}

/// Size and contents of a vocabulary, in id order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VocabularyStats {
    pub size: usize,
    pub symbols: Vec<String>,
}

impl Vocabulary {
    pub fn new() -> Self {
        let mut vocab = Self {
            forward: HashMap::new(),
            reverse: Vec::new(),
        };
        for symbol in SEED_SYMBOLS {
            vocab.insert(symbol);
        }
        vocab
    }

    /// Id for `symbol`, inserting it if unseen.
    pub fn insert(&mut self, symbol: &str) -> u32 {
        if let Some(&id) = self.forward.get(symbol) {
            return id;
        }
        let id = self.reverse.len() as u32;
        self.forward.insert(symbol.to_string(), id);
        self.reverse.push(symbol.to_string());
        id
    }

    pub fn id(&self, symbol: &str) -> Option<u32> {
        self.forward.get(symbol).copied()
    }

    pub fn symbol(&self, id: u32) -> Option<&str> {
        self.reverse.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.reverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reverse.is_empty()
    }

    pub fn stats(&self) -> VocabularyStats {
        VocabularyStats {
            size: self.reverse.len(),
            symbols: self.reverse.clone(),
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

/// 32-bit rolling string hash (`h = h * 31 + unit` over UTF-16 units), made
/// non-negative.
pub fn hash_symbol(value: &str) -> u32 {
    let hash = value
        .encode_utf16()
        .fold(0i32, |h, unit| (h << 5).wrapping_sub(h).wrapping_add(unit as i32));
    hash.unsigned_abs()
}

/// Hash folded into `[0, 1)` with three decimal digits of resolution.
pub fn normalized_hash(value: &str) -> f32 {
    (hash_symbol(value) % 1000) as f32 / 1000.0
}
