use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Deduction,
    Induction,
    Abduction,
    Revision,
    Choice,
}

impl RuleType {
    /// Scale applied to the magnitude ratio when computing a step's
    /// confidence change.
    pub fn confidence_factor(self) -> f32 {
        match self {
            RuleType::Deduction => 0.9,
            RuleType::Induction => 0.7,
            RuleType::Abduction => 0.5,
            RuleType::Revision | RuleType::Choice => 0.6,
        }
    }

    /// Selection bonus for a chain currently holding `confidence`.
    pub fn selection_bonus(self, confidence: f32) -> f32 {
        match self {
            RuleType::Deduction if confidence > 0.8 => 0.3,
            RuleType::Induction if confidence > 0.6 => 0.2,
            RuleType::Abduction if confidence > 0.4 => 0.1,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorOperation {
    /// Scalar contraction of the two most recent premises, used to rescale the
    /// latest one.
    Contraction,
    /// Weighted sum of premises with weights `1/(i+1)`.
    Composition,
    /// Near-identity linear map drawn from the kernel RNG.
    Transformation,
}

impl TensorOperation {
    pub fn label(self) -> &'static str {
        match self {
            TensorOperation::Contraction => "tensor_contraction",
            TensorOperation::Composition => "tensor_composition",
            TensorOperation::Transformation => "tensor_transformation",
        }
    }
}

/// A PLN-style inference rule. The number of premise patterns is the number
/// of chain outputs the rule consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRule {
    pub id: String,
    pub name: String,
    pub rule_type: RuleType,
    pub premise_patterns: Vec<String>,
    pub conclusion_pattern: String,
    pub tensor_operation: TensorOperation,
}

impl InferenceRule {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        rule_type: RuleType,
        premises: &[&str],
        conclusion: &str,
        tensor_operation: TensorOperation,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rule_type,
            premise_patterns: premises.iter().map(|p| p.to_string()).collect(),
            conclusion_pattern: conclusion.to_string(),
            tensor_operation,
        }
    }

    pub fn premise_arity(&self) -> usize {
        self.premise_patterns.len()
    }
}

/// Deduction, induction and abduction over two premises, and single-premise
/// belief revision.
pub fn default_rules() -> Vec<InferenceRule> {
    vec![
        InferenceRule::new(
            "deduction",
            "Modus Ponens",
            RuleType::Deduction,
            &["implication(A,B)", "A"],
            "B",
            TensorOperation::Contraction,
        ),
        InferenceRule::new(
            "induction",
            "Inductive Inference",
            RuleType::Induction,
            &["implication(A,B)", "B"],
            "A",
            TensorOperation::Contraction,
        ),
        InferenceRule::new(
            "abduction",
            "Abductive Reasoning",
            RuleType::Abduction,
            &["implication(A,B)", "B"],
            "A",
            TensorOperation::Composition,
        ),
        InferenceRule::new(
            "revision",
            "Belief Revision",
            RuleType::Revision,
            &["A"],
            "A_revised",
            TensorOperation::Transformation,
        ),
    ]
}
