//! # Cognitive Kernel Core
//!
//! A symbolic-neural cognition kernel. Symbolic atoms and links are encoded as
//! tensors, attention is allocated across them, reasoning chains are advanced
//! by tensor operations, and a meta-cognitive layer observes the whole system
//! and adapts its parameters.
//!
//! ## Quick Start
//!
//! ```rust
//! use cognitive_kernel_core::{Atom, AtomType, CognitiveKernel, KernelConfig, Link, LinkType};
//!
//! let mut kernel = CognitiveKernel::new(KernelConfig::default()).unwrap();
//!
//! let atoms = vec![
//!     Atom::new("cat", AtomType::Concept, Some("cat")).with_importance(0.8),
//!     Atom::new("animal", AtomType::Concept, Some("animal")).with_importance(0.4),
//! ];
//! let links = vec![Link::new("cat_is_animal", LinkType::Inheritance, ["cat", "animal"])];
//!
//! let result = kernel.ingest(&atoms, &links).unwrap();
//! assert!(result.success);
//!
//! kernel.start_reasoning_chain(&["cat", "animal"]);
//! let stats = kernel.tick().unwrap();
//! println!("attention entropy: {}", stats.attention.attention_entropy);
//! ```
//!
//! ## Core Modules
//!
//! - [`tensor`] - Tensor values and the shared accounting context
//! - [`encoder`] - Atom/link to tensor encoding
//! - [`attention`] - Softmax and economic attention allocation
//! - [`reasoning`] - Inference rules and reasoning chains
//! - [`meta`] - Self-monitoring, membranes and feedback loops
//! - [`kernel`] - The cycle orchestrator and its background runner
//! - [`config`] - Kernel configuration via TOML
//! - [`logging`] - JSON line-delimited logging

pub mod atomspace;
pub mod attention;
pub mod config;
pub mod encoder;
pub mod kernel;
pub mod logging;
pub mod meta;
pub mod reasoning;
pub mod tensor;

pub use atomspace::{
    Atom, AtomType, AtomeseKind, AtomeseNode, AttentionValue, Link, LinkType, SimpleTruth,
    TruthValue,
};
pub use attention::{AttentionEngine, AttentionFlow, AttentionStats, FlowReason};
pub use config::{
    AttentionConfig, AttentionMechanism, ConfigError, IntegrationConfig, KernelConfig,
    MetaConfig, ReasoningConfig, TensorConfig,
};
pub use encoder::{BatchEncoding, Decoded, EncodeError, LinkTensor, NodeTensor, TensorEncoder};
pub use kernel::{
    CognitiveKernel, KernelError, KernelFault, KernelRunner, KernelState, KernelStats,
    KernelStatus, PerformanceMetrics, ProcessingResult,
};
pub use meta::{
    ConvergenceStatus, MembraneKind, MetaCognitiveEngine, MetaCognitiveMetrics, SelfModification,
    SystemState,
};
pub use reasoning::{
    ChainId, ChainStatus, InferenceRule, ReasoningChain, ReasoningEngine, ReasoningStats,
    RuleType, TensorOperation,
};
pub use tensor::{DType, KernelTensor, TensorContext, TensorError};
