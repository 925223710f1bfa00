//! Subsystem membranes with adjustable permeability.
//!
//! Every membrane holds an internal state that leaks toward its external
//! interface at a rate proportional to its permeability. Critical system
//! states halve permeability; efficient processing widens it by 20%.

use rand::Rng;
use serde::Serialize;

use super::state::SystemState;
use crate::tensor::{DType, KernelTensor, TensorContext};

pub const MEMBRANE_WIDTH: usize = 50;
pub const MIN_PERMEABILITY: f32 = 0.1;
pub const MAX_PERMEABILITY: f32 = 1.0;
const LEAK_RATE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MembraneKind {
    Cognitive,
    Attention,
    Reasoning,
    Meta,
}

impl MembraneKind {
    pub const ALL: [MembraneKind; 4] = [
        MembraneKind::Cognitive,
        MembraneKind::Attention,
        MembraneKind::Reasoning,
        MembraneKind::Meta,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MembraneKind::Cognitive => "cognitive",
            MembraneKind::Attention => "attention",
            MembraneKind::Reasoning => "reasoning",
            MembraneKind::Meta => "meta",
        }
    }

    /// Starting permeability at the default configured value of 0.5.
    fn base_permeability(self) -> f32 {
        match self {
            MembraneKind::Cognitive => 0.8,
            MembraneKind::Attention => 0.6,
            MembraneKind::Reasoning => 0.4,
            MembraneKind::Meta => 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Membrane {
    pub id: String,
    pub kind: MembraneKind,
    /// What crossed the boundary on the last update: `external ⊙ permeability`.
    pub boundary_tensor: KernelTensor,
    pub permeability_weights: KernelTensor,
    pub internal_state: KernelTensor,
    pub external_interface: KernelTensor,
    /// `width × width` transfer rules, identity at creation.
    pub membrane_rules: KernelTensor,
}

impl Membrane {
    /// `configured` shifts every kind's base permeability by its offset from 0.5.
    pub fn new(ctx: &TensorContext, kind: MembraneKind, configured: f32) -> Self {
        let name = kind.as_str();
        let vector = |part: &str| {
            ctx.create(&[MEMBRANE_WIDTH], DType::F32, Some(&format!("membrane_{part}_{name}")), true)
        };

        let base = kind.base_permeability() + (configured - 0.5);
        let mut permeability_weights = vector("permeability");
        ctx.with_rng(|rng| {
            for weight in permeability_weights.data.iter_mut() {
                let noise: f32 = rng.gen_range(-0.05..0.05);
                *weight = (base + noise).clamp(MIN_PERMEABILITY, MAX_PERMEABILITY);
            }
        });

        let mut membrane_rules = ctx.create(
            &[MEMBRANE_WIDTH, MEMBRANE_WIDTH],
            DType::F32,
            Some(&format!("membrane_rules_{name}")),
            true,
        );
        for i in 0..MEMBRANE_WIDTH {
            membrane_rules.set(i * MEMBRANE_WIDTH + i, 1.0);
        }

        Self {
            id: format!("membrane_{name}"),
            kind,
            boundary_tensor: vector("boundary"),
            permeability_weights,
            internal_state: vector("internal"),
            external_interface: vector("external"),
            membrane_rules,
        }
    }

    pub fn mean_permeability(&self) -> f32 {
        self.permeability_weights.mean()
    }

    /// Refresh the external interface with the signal this membrane guards.
    pub fn sense(&mut self, state: &SystemState) {
        let constant = match self.kind {
            MembraneKind::Cognitive => Some(state.cognitive_load),
            MembraneKind::Reasoning => Some(state.reasoning_activity),
            MembraneKind::Meta => Some(state.processing_efficiency),
            MembraneKind::Attention => None,
        };
        let attention = &state.attention_distribution;
        let fallback = state.mean_attention();
        for (i, slot) in self.external_interface.data.iter_mut().enumerate() {
            *slot = constant.unwrap_or_else(|| attention.get(i).copied().unwrap_or(fallback));
        }
    }

    /// Scale permeability by `factor`, clamp it, then leak the external
    /// interface into the internal state through the rule matrix.
    pub fn adjust(&mut self, factor: f32) {
        for weight in self.permeability_weights.data.iter_mut() {
            *weight = (*weight * factor).clamp(MIN_PERMEABILITY, MAX_PERMEABILITY);
        }

        let width = self.internal_state.len();
        for i in 0..width {
            let routed: f32 = (0..width)
                .map(|j| self.membrane_rules.get(i * width + j) * self.external_interface.get(j))
                .sum();
            let permeability = self.permeability_weights.get(i);
            let rate = permeability * LEAK_RATE;
            let internal = self.internal_state.get(i) * (1.0 - rate) + routed * rate;
            self.internal_state.set(i, internal);
            self.boundary_tensor.set(i, routed * permeability);
        }
    }

    pub(crate) fn tensors(&self) -> [&KernelTensor; 5] {
        [
            &self.boundary_tensor,
            &self.permeability_weights,
            &self.internal_state,
            &self.external_interface,
            &self.membrane_rules,
        ]
    }
}

/// Permeability factor for a snapshot: halve when critical, widen when
/// efficient.
pub fn permeability_factor(state: &SystemState) -> f32 {
    if state.is_critical() {
        0.5
    } else if state.processing_efficiency > 0.8 {
        1.2
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::state::ConvergenceStatus;

    fn state(status: ConvergenceStatus, efficiency: f32) -> SystemState {
        SystemState {
            cognitive_load: 0.3,
            attention_distribution: vec![0.2, 0.4],
            reasoning_activity: 0.5,
            memory_usage: 0.1,
            processing_efficiency: efficiency,
            convergence_status: status,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn initial_permeability_follows_kind() {
        let ctx = TensorContext::with_seed(2);
        let cognitive = Membrane::new(&ctx, MembraneKind::Cognitive, 0.5);
        let meta = Membrane::new(&ctx, MembraneKind::Meta, 0.5);
        assert!((cognitive.mean_permeability() - 0.8).abs() < 0.05);
        assert!((meta.mean_permeability() - 0.2).abs() < 0.05);
        assert_eq!(cognitive.membrane_rules.get(0), 1.0);
        assert_eq!(cognitive.membrane_rules.get(1), 0.0);
    }

    #[test]
    fn critical_state_halves_and_clamps() {
        let ctx = TensorContext::with_seed(2);
        let mut membrane = Membrane::new(&ctx, MembraneKind::Reasoning, 0.5);
        let before = membrane.mean_permeability();
        let critical = state(ConvergenceStatus::Critical, 0.9);
        membrane.adjust(permeability_factor(&critical));
        assert!(membrane.mean_permeability() < before);
        for _ in 0..10 {
            membrane.adjust(0.5);
        }
        assert!(membrane
            .permeability_weights
            .data
            .iter()
            .all(|w| *w >= MIN_PERMEABILITY));
    }

    #[test]
    fn efficient_state_widens_and_leaks_inward() {
        let ctx = TensorContext::with_seed(2);
        let mut membrane = Membrane::new(&ctx, MembraneKind::Attention, 0.5);
        let efficient = state(ConvergenceStatus::Stable, 0.9);
        assert_eq!(permeability_factor(&efficient), 1.2);
        membrane.sense(&efficient);
        assert_eq!(membrane.external_interface.get(1), 0.4);
        assert!((membrane.external_interface.get(10) - 0.3).abs() < 1e-6);
        membrane.adjust(1.2);
        assert!(membrane.internal_state.get(1) > 0.0);
        assert!(membrane.internal_state.get(1) < 0.4);
    }
}
