use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cognitive_kernel_core::meta::Membrane;
use cognitive_kernel_core::{
    Atom, AtomType, AtomeseKind, AtomeseNode, AttentionMechanism, AttentionValue, ChainStatus,
    CognitiveKernel, ConvergenceStatus, InferenceRule, KernelConfig, KernelRunner, KernelStatus,
    Link, LinkType, RuleType, SimpleTruth, TensorOperation, TruthValue,
};

fn concept(id: &str, strength: f32, sti: f32) -> Atom {
    Atom::new(id, AtomType::Concept, Some(id))
        .with_truth(TruthValue::new(strength, 0.9, 1.0))
        .with_attention(AttentionValue::new(sti, 0.0, false))
}

fn kernel_with(mechanism: AttentionMechanism) -> CognitiveKernel {
    let mut config = KernelConfig::default();
    config.attention.mechanism = mechanism;
    CognitiveKernel::new(config).expect("default config is valid")
}

#[test]
fn most_important_atom_wins_softmax_attention() {
    let mut kernel = kernel_with(AttentionMechanism::Softmax);
    let atoms: Vec<Atom> = [0.1, 0.3, 0.5, 0.7, 0.9]
        .iter()
        .enumerate()
        .map(|(i, &importance)| concept(&format!("a{i}"), importance, 0.0).with_importance(importance))
        .collect();
    kernel.ingest(&atoms, &[]).unwrap();

    let nodes = kernel.encoder().node_tensors();
    let winner = nodes
        .iter()
        .max_by(|a, b| a.weight().total_cmp(&b.weight()))
        .unwrap();
    assert_eq!(winner.atom_id, "a4");
    let total: f32 = nodes.iter().map(|n| n.weight()).sum();
    assert!(total > 0.0);
}

#[test]
fn economic_cycle_narrows_attention_gap() {
    let mut kernel = kernel_with(AttentionMechanism::Economic);
    let atoms = vec![concept("hot", 0.5, 100.0), concept("cold", 0.5, 10.0)];
    kernel
        .encoder_mut()
        .encode_batch(&atoms, &[Link::new("l", LinkType::Inheritance, ["hot", "cold"])
            .with_truth(TruthValue::new(0.8, 0.9, 1.0))]);
    let gap = |kernel: &CognitiveKernel| {
        let hot = kernel.encoder().node("hot").unwrap().weight();
        let cold = kernel.encoder().node("cold").unwrap().weight();
        hot - cold
    };
    let before = gap(&kernel);
    assert!((before - 0.9).abs() < 1e-3);

    kernel.tick().unwrap();
    assert!(gap(&kernel) < before);
}

#[test]
fn two_premise_rule_on_single_seed_never_fails() {
    let mut kernel = kernel_with(AttentionMechanism::Softmax);
    kernel.ingest(&[concept("solo", 0.8, 1.0)], &[]).unwrap();
    for id in ["deduction", "induction", "abduction", "revision"] {
        kernel.reasoning_mut().remove_rule(id);
    }
    kernel.reasoning_mut().add_rule(InferenceRule::new(
        "pairwise",
        "Pairwise Contraction",
        RuleType::Deduction,
        &["A", "B"],
        "C",
        TensorOperation::Contraction,
    ));

    let id = kernel.start_reasoning_chain(&["solo"]).unwrap();
    let stats = kernel.tick().unwrap();
    let status = kernel.reasoning().chain(id).unwrap().status;
    assert!(matches!(status, ChainStatus::Active | ChainStatus::Converged));
    assert_eq!(stats.reasoning.terminated_chains, 0);
    assert_eq!(stats.state.error_count, 0);
}

#[test]
fn memory_pressure_turns_critical_and_narrows_membranes() {
    let mut kernel = kernel_with(AttentionMechanism::Softmax);
    let ctx = kernel.context().clone();
    let used = ctx.memory_stats().used_bytes;
    ctx.set_max_memory(used * 100 / 95);

    let before: Vec<f32> = kernel.meta().membranes().iter().map(Membrane::mean_permeability).collect();
    let stats = kernel.tick().unwrap();
    assert_eq!(stats.meta.convergence_status, Some(ConvergenceStatus::Critical));
    let after: Vec<f32> = kernel.meta().membranes().iter().map(Membrane::mean_permeability).collect();
    assert!(before.iter().zip(&after).any(|(b, a)| a < b));
}

#[test]
fn atomese_ingest_is_idempotent() {
    let mut kernel = kernel_with(AttentionMechanism::Hybrid);
    let nodes = vec![
        AtomeseNode {
            id: "bird".into(),
            kind: AtomeseKind::ConceptNode,
            name: Some("bird".into()),
            children: None,
            attention_value: Some(0.95),
            truth_value: Some(SimpleTruth {
                strength: 0.9,
                confidence: 0.8,
            }),
        },
        AtomeseNode {
            id: "flies".into(),
            kind: AtomeseKind::EvaluationLink,
            name: None,
            children: Some(vec!["bird".into()]),
            attention_value: None,
            truth_value: None,
        },
    ];
    let first = kernel.ingest_atomese(&nodes).unwrap();
    assert!(first.success);
    assert_eq!(first.tensors_processed, 2);

    let live = kernel.context().memory_stats().live_tensors;
    kernel.ingest_atomese(&nodes).unwrap();
    assert_eq!(kernel.context().memory_stats().live_tensors, live);
    assert_eq!(kernel.encoder().node_tensors().len(), 2);
}

#[test]
fn performance_history_is_bounded() {
    let mut config = KernelConfig::default();
    config.integration.performance_history = 3;
    let mut kernel = CognitiveKernel::new(config).unwrap();
    kernel.ingest(&[concept("x", 0.5, 1.0)], &[]).unwrap();

    let start = Instant::now();
    for i in 0..6 {
        kernel.tick_at(start + Duration::from_secs(i)).unwrap();
    }
    assert_eq!(kernel.cycle_count(), 7);
    assert_eq!(kernel.performance_history().count(), 3);
    let latest = kernel.state().performance;
    assert!((0.0..=1.0).contains(&latest.memory_efficiency));
    assert!((0.0..=1.0).contains(&latest.overall_efficiency));
}

#[test]
fn runner_drives_callbacks_until_stopped() {
    let mut config = KernelConfig::default();
    config.integration.tick_frequency = 100.0;
    let mut kernel = CognitiveKernel::new(config).unwrap();
    kernel.ingest(&[concept("x", 0.5, 1.0), concept("y", 0.7, 2.0)], &[]).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    kernel.on_cycle_complete(move |stats| sink.lock().unwrap().push(stats.state.cycle_count));

    let runner = KernelRunner::spawn(kernel).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.lock().unwrap().len() < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    let mut kernel = runner.stop().unwrap();

    let cycles = seen.lock().unwrap().clone();
    assert!(cycles.len() >= 3);
    assert!(cycles.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(kernel.status(), KernelStatus::Paused);

    kernel.shutdown();
    assert!(kernel.tick().is_err());
}
