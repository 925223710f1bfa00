//! Kernel configuration via TOML files.
//!
//! Every field has a default, so an empty document (or a document with only
//! some sections) parses into a complete [`KernelConfig`]. Values are
//! validated once at construction; the kernel never re-checks them.
//!
//! ```toml
//! [tensor]
//! node_embedding_dim = 128
//! seed = 42
//!
//! [attention]
//! mechanism = "hybrid"
//! update_frequency = 10.0
//!
//! [reasoning]
//! max_reasoning_depth = 5
//!
//! [meta]
//! meta_levels = 3
//!
//! [integration]
//! tick_frequency = 10.0
//! cycle_log = "logs/cycles.jsonl"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::DEFAULT_MAX_MEMORY;

/// Top-level kernel configuration.
///
/// # Examples
///
/// ```
/// use cognitive_kernel_core::KernelConfig;
///
/// let config = KernelConfig::from_str("[reasoning]\nmax_reasoning_depth = 8")
///     .unwrap_or_else(|_| KernelConfig::default());
/// assert_eq!(config.reasoning.max_reasoning_depth, 8);
/// assert_eq!(config.tensor.node_embedding_dim, 128);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelConfig {
    pub tensor: TensorConfig,
    pub attention: AttentionConfig,
    pub reasoning: ReasoningConfig,
    pub meta: MetaConfig,
    pub integration: IntegrationConfig,
}

impl KernelConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawKernelConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        let config = Self {
            tensor: raw.tensor.into(),
            attention: raw.attention.into(),
            reasoning: raw.reasoning.into(),
            meta: raw.meta.into(),
            integration: raw.integration.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every section. Called by [`from_str`](Self::from_str) and by the
    /// kernel constructor for programmatically built configs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tensor.validate()?;
        self.attention.validate()?;
        self.reasoning.validate()?;
        self.meta.validate()?;
        self.integration.validate()
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            tensor: TensorConfig::default(),
            attention: AttentionConfig::default(),
            reasoning: ReasoningConfig::default(),
            meta: MetaConfig::default(),
            integration: IntegrationConfig::default(),
        }
    }
}

/// Tensor widths, memory accounting and the RNG seed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TensorConfig {
    pub node_embedding_dim: usize,
    pub link_embedding_dim: usize,
    pub symbolic_feature_dim: usize,
    pub max_memory_bytes: usize,
    pub seed: u64,
}

impl TensorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_embedding_dim < 2 {
            return Err(invalid("tensor.node_embedding_dim", "must be ≥ 2"));
        }
        if self.link_embedding_dim < 7 {
            return Err(invalid("tensor.link_embedding_dim", "must be ≥ 7"));
        }
        if self.symbolic_feature_dim < 5 {
            return Err(invalid("tensor.symbolic_feature_dim", "must be ≥ 5"));
        }
        if self.max_memory_bytes == 0 {
            return Err(invalid("tensor.max_memory_bytes", "must be non-zero"));
        }
        Ok(())
    }
}

impl Default for TensorConfig {
    fn default() -> Self {
        RawTensor::default().into()
    }
}

/// Attention mechanism selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionMechanism {
    Softmax,
    #[serde(alias = "ecan")]
    Economic,
    Hybrid,
}

/// Attention allocation parameters. Frequencies are in Hz.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttentionConfig {
    pub mechanism: AttentionMechanism,
    pub temperature: f32,
    pub resource_budget: f32,
    pub update_frequency: f32,
    pub decay_rate: f32,
    pub diffusion_rate: f32,
    pub rent_rate: f32,
    pub wage_rate: f32,
    pub gradient_clipping: f32,
    pub learning_rate: f32,
}

impl AttentionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("attention.temperature", self.temperature)?;
        non_negative("attention.resource_budget", self.resource_budget)?;
        positive("attention.update_frequency", self.update_frequency)?;
        unit_interval("attention.decay_rate", self.decay_rate)?;
        unit_interval("attention.diffusion_rate", self.diffusion_rate)?;
        unit_interval("attention.rent_rate", self.rent_rate)?;
        unit_interval("attention.wage_rate", self.wage_rate)?;
        positive("attention.gradient_clipping", self.gradient_clipping)?;
        non_negative("attention.learning_rate", self.learning_rate)
    }

    /// Minimum spacing between two effective updates.
    pub fn update_interval(&self) -> Duration {
        interval(self.update_frequency)
    }
}

impl Default for AttentionConfig {
    fn default() -> Self {
        RawAttention::default().into()
    }
}

/// Reasoning limits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningConfig {
    pub max_reasoning_depth: usize,
    pub confidence_threshold: f32,
    /// Batch width when advancing chains. Every active chain still advances
    /// once per tick.
    pub parallel_chains: usize,
    /// Seconds a terminal chain is kept after its last step.
    pub chain_retention_secs: f32,
    /// Bound on the global reasoning-step history.
    pub history_limit: usize,
}

impl ReasoningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reasoning_depth == 0 {
            return Err(invalid("reasoning.max_reasoning_depth", "must be ≥ 1"));
        }
        unit_interval("reasoning.confidence_threshold", self.confidence_threshold)?;
        if self.parallel_chains == 0 {
            return Err(invalid("reasoning.parallel_chains", "must be ≥ 1"));
        }
        non_negative("reasoning.chain_retention_secs", self.chain_retention_secs)?;
        if self.history_limit == 0 {
            return Err(invalid("reasoning.history_limit", "must be ≥ 1"));
        }
        Ok(())
    }

    pub fn chain_retention(&self) -> Duration {
        Duration::from_secs_f32(self.chain_retention_secs)
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        RawReasoning::default().into()
    }
}

/// Meta-cognitive feedback parameters. Frequencies are in Hz.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetaConfig {
    pub meta_levels: usize,
    pub monitoring_frequency: f32,
    pub adaptation_rate: f32,
    pub convergence_threshold: f32,
    pub membrane_permeability: f32,
    pub feedback_damping: f32,
    pub plasticity: f32,
    pub meta_attention_allocation: f32,
    pub history_limit: usize,
    pub modification_log_limit: usize,
    /// Optional JSONL journal for self-modification records.
    pub modification_journal: Option<PathBuf>,
}

impl MetaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.meta_levels == 0 {
            return Err(invalid("meta.meta_levels", "must be ≥ 1"));
        }
        positive("meta.monitoring_frequency", self.monitoring_frequency)?;
        non_negative("meta.adaptation_rate", self.adaptation_rate)?;
        non_negative("meta.convergence_threshold", self.convergence_threshold)?;
        positive("meta.membrane_permeability", self.membrane_permeability)?;
        if self.membrane_permeability > 1.0 {
            return Err(invalid("meta.membrane_permeability", "must be ≤ 1"));
        }
        unit_interval("meta.feedback_damping", self.feedback_damping)?;
        non_negative("meta.plasticity", self.plasticity)?;
        unit_interval("meta.meta_attention_allocation", self.meta_attention_allocation)?;
        if self.history_limit == 0 || self.modification_log_limit == 0 {
            return Err(invalid("meta", "history limits must be ≥ 1"));
        }
        Ok(())
    }

    pub fn monitoring_interval(&self) -> Duration {
        interval(self.monitoring_frequency)
    }
}

impl Default for MetaConfig {
    fn default() -> Self {
        RawMeta::default().into()
    }
}

/// Orchestrator parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationConfig {
    /// Ticks per second for [`KernelRunner`](crate::kernel::KernelRunner).
    pub tick_frequency: f32,
    pub adaptive_scaling: bool,
    pub performance_history: usize,
    /// Optional JSONL journal, one line per completed tick.
    pub cycle_log: Option<PathBuf>,
}

impl IntegrationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("integration.tick_frequency", self.tick_frequency)?;
        if self.performance_history == 0 {
            return Err(invalid("integration.performance_history", "must be ≥ 1"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        interval(self.tick_frequency)
    }
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        RawIntegration::default().into()
    }
}

fn interval(frequency_hz: f32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(frequency_hz))
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(field, "must be positive"));
    }
    Ok(())
}

fn non_negative(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, "must be ≥ 0"));
    }
    Ok(())
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(invalid(field, "must lie in [0, 1]"));
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct RawKernelConfig {
    #[serde(default)]
    tensor: RawTensor,
    #[serde(default)]
    attention: RawAttention,
    #[serde(default)]
    reasoning: RawReasoning,
    #[serde(default)]
    meta: RawMeta,
    #[serde(default)]
    integration: RawIntegration,
}

#[derive(Debug, Deserialize)]
struct RawTensor {
    #[serde(default = "default_node_dim")]
    node_embedding_dim: usize,
    #[serde(default = "default_link_dim")]
    link_embedding_dim: usize,
    #[serde(default = "default_feature_dim")]
    symbolic_feature_dim: usize,
    #[serde(default = "default_max_memory")]
    max_memory_bytes: usize,
    #[serde(default = "default_seed")]
    seed: u64,
}

impl Default for RawTensor {
    fn default() -> Self {
        Self {
            node_embedding_dim: default_node_dim(),
            link_embedding_dim: default_link_dim(),
            symbolic_feature_dim: default_feature_dim(),
            max_memory_bytes: default_max_memory(),
            seed: default_seed(),
        }
    }
}

impl From<RawTensor> for TensorConfig {
    fn from(raw: RawTensor) -> Self {
        Self {
            node_embedding_dim: raw.node_embedding_dim,
            link_embedding_dim: raw.link_embedding_dim,
            symbolic_feature_dim: raw.symbolic_feature_dim,
            max_memory_bytes: raw.max_memory_bytes,
            seed: raw.seed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAttention {
    #[serde(default = "default_mechanism")]
    mechanism: AttentionMechanism,
    #[serde(default = "default_one")]
    temperature: f32,
    #[serde(default = "default_budget")]
    resource_budget: f32,
    #[serde(default = "default_ten")]
    update_frequency: f32,
    #[serde(default = "default_decay")]
    decay_rate: f32,
    #[serde(default = "default_diffusion")]
    diffusion_rate: f32,
    #[serde(default = "default_rent")]
    rent_rate: f32,
    #[serde(default = "default_wage")]
    wage_rate: f32,
    #[serde(default = "default_one")]
    gradient_clipping: f32,
    #[serde(default = "default_attention_lr")]
    learning_rate: f32,
}

impl Default for RawAttention {
    fn default() -> Self {
        Self {
            mechanism: default_mechanism(),
            temperature: default_one(),
            resource_budget: default_budget(),
            update_frequency: default_ten(),
            decay_rate: default_decay(),
            diffusion_rate: default_diffusion(),
            rent_rate: default_rent(),
            wage_rate: default_wage(),
            gradient_clipping: default_one(),
            learning_rate: default_attention_lr(),
        }
    }
}

impl From<RawAttention> for AttentionConfig {
    fn from(raw: RawAttention) -> Self {
        Self {
            mechanism: raw.mechanism,
            temperature: raw.temperature,
            resource_budget: raw.resource_budget,
            update_frequency: raw.update_frequency,
            decay_rate: raw.decay_rate,
            diffusion_rate: raw.diffusion_rate,
            rent_rate: raw.rent_rate,
            wage_rate: raw.wage_rate,
            gradient_clipping: raw.gradient_clipping,
            learning_rate: raw.learning_rate,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawReasoning {
    #[serde(default = "default_max_depth")]
    max_reasoning_depth: usize,
    #[serde(default = "default_confidence_threshold")]
    confidence_threshold: f32,
    #[serde(default = "default_parallel_chains")]
    parallel_chains: usize,
    #[serde(default = "default_retention")]
    chain_retention_secs: f32,
    #[serde(default = "default_reasoning_history")]
    history_limit: usize,
}

impl Default for RawReasoning {
    fn default() -> Self {
        Self {
            max_reasoning_depth: default_max_depth(),
            confidence_threshold: default_confidence_threshold(),
            parallel_chains: default_parallel_chains(),
            chain_retention_secs: default_retention(),
            history_limit: default_reasoning_history(),
        }
    }
}

impl From<RawReasoning> for ReasoningConfig {
    fn from(raw: RawReasoning) -> Self {
        Self {
            max_reasoning_depth: raw.max_reasoning_depth,
            confidence_threshold: raw.confidence_threshold,
            parallel_chains: raw.parallel_chains,
            chain_retention_secs: raw.chain_retention_secs,
            history_limit: raw.history_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMeta {
    #[serde(default = "default_meta_levels")]
    meta_levels: usize,
    #[serde(default = "default_monitoring_frequency")]
    monitoring_frequency: f32,
    #[serde(default = "default_adaptation_rate")]
    adaptation_rate: f32,
    #[serde(default = "default_adaptation_rate")]
    convergence_threshold: f32,
    #[serde(default = "default_permeability")]
    membrane_permeability: f32,
    #[serde(default = "default_damping")]
    feedback_damping: f32,
    #[serde(default = "default_plasticity")]
    plasticity: f32,
    #[serde(default = "default_meta_attention")]
    meta_attention_allocation: f32,
    #[serde(default = "default_state_history")]
    history_limit: usize,
    #[serde(default = "default_modification_limit")]
    modification_log_limit: usize,
    #[serde(default)]
    modification_journal: Option<String>,
}

impl Default for RawMeta {
    fn default() -> Self {
        Self {
            meta_levels: default_meta_levels(),
            monitoring_frequency: default_monitoring_frequency(),
            adaptation_rate: default_adaptation_rate(),
            convergence_threshold: default_adaptation_rate(),
            membrane_permeability: default_permeability(),
            feedback_damping: default_damping(),
            plasticity: default_plasticity(),
            meta_attention_allocation: default_meta_attention(),
            history_limit: default_state_history(),
            modification_log_limit: default_modification_limit(),
            modification_journal: None,
        }
    }
}

impl From<RawMeta> for MetaConfig {
    fn from(raw: RawMeta) -> Self {
        Self {
            meta_levels: raw.meta_levels,
            monitoring_frequency: raw.monitoring_frequency,
            adaptation_rate: raw.adaptation_rate,
            convergence_threshold: raw.convergence_threshold,
            membrane_permeability: raw.membrane_permeability,
            feedback_damping: raw.feedback_damping,
            plasticity: raw.plasticity,
            meta_attention_allocation: raw.meta_attention_allocation,
            history_limit: raw.history_limit,
            modification_log_limit: raw.modification_log_limit,
            modification_journal: raw.modification_journal.map(PathBuf::from),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawIntegration {
    #[serde(default = "default_ten")]
    tick_frequency: f32,
    #[serde(default = "default_true")]
    adaptive_scaling: bool,
    #[serde(default = "default_performance_history")]
    performance_history: usize,
    #[serde(default)]
    cycle_log: Option<String>,
}

impl Default for RawIntegration {
    fn default() -> Self {
        Self {
            tick_frequency: default_ten(),
            adaptive_scaling: default_true(),
            performance_history: default_performance_history(),
            cycle_log: None,
        }
    }
}

impl From<RawIntegration> for IntegrationConfig {
    fn from(raw: RawIntegration) -> Self {
        Self {
            tick_frequency: raw.tick_frequency,
            adaptive_scaling: raw.adaptive_scaling,
            performance_history: raw.performance_history,
            cycle_log: raw.cycle_log.map(PathBuf::from),
        }
    }
}

fn default_node_dim() -> usize {
    128
}

fn default_link_dim() -> usize {
    64
}

fn default_feature_dim() -> usize {
    16
}

fn default_max_memory() -> usize {
    DEFAULT_MAX_MEMORY
}

fn default_seed() -> u64 {
    42
}

fn default_mechanism() -> AttentionMechanism {
    AttentionMechanism::Hybrid
}

fn default_one() -> f32 {
    1.0
}

fn default_ten() -> f32 {
    10.0
}

fn default_budget() -> f32 {
    1000.0
}

fn default_decay() -> f32 {
    0.01
}

fn default_diffusion() -> f32 {
    0.1
}

fn default_rent() -> f32 {
    0.01
}

fn default_wage() -> f32 {
    0.8
}

fn default_attention_lr() -> f32 {
    0.001
}

fn default_max_depth() -> usize {
    5
}

fn default_confidence_threshold() -> f32 {
    0.1
}

fn default_parallel_chains() -> usize {
    4
}

fn default_retention() -> f32 {
    300.0
}

fn default_reasoning_history() -> usize {
    1000
}

fn default_meta_levels() -> usize {
    3
}

fn default_monitoring_frequency() -> f32 {
    5.0
}

fn default_adaptation_rate() -> f32 {
    0.01
}

fn default_permeability() -> f32 {
    0.5
}

fn default_damping() -> f32 {
    0.9
}

fn default_plasticity() -> f32 {
    0.1
}

fn default_meta_attention() -> f32 {
    0.2
}

fn default_state_history() -> usize {
    100
}

fn default_modification_limit() -> usize {
    50
}

fn default_performance_history() -> usize {
    100
}

fn default_true() -> bool {
    true
}

/// Failures while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
