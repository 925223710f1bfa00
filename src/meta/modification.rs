//! Self-modification records.
//!
//! The log keeps a bounded in-memory buffer for inspection and, when a journal
//! path is configured, appends every record to it as one JSON line.

use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;

use rand::Rng;
use serde::Serialize;

use super::state::SystemState;
use crate::logging::append_json_line;

pub const MODIFICATION_TENSOR_WIDTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModificationKind {
    ParameterAdjustment,
    StructureChange,
    RuleAddition,
    RuleRemoval,
}

impl ModificationKind {
    /// Pick the modification addressing the most strained resource.
    pub fn for_state(state: &SystemState) -> Self {
        if state.memory_usage > 0.8 {
            ModificationKind::StructureChange
        } else if state.reasoning_activity < 0.2 {
            ModificationKind::RuleAddition
        } else {
            ModificationKind::ParameterAdjustment
        }
    }

    pub fn target_component(self) -> &'static str {
        match self {
            ModificationKind::StructureChange => "memory",
            ModificationKind::RuleAddition | ModificationKind::RuleRemoval => "reasoning",
            ModificationKind::ParameterAdjustment => "meta_cognitive",
        }
    }

    /// Draw a simulated effectiveness score in this kind's band.
    pub fn effectiveness<R: Rng>(self, rng: &mut R) -> f32 {
        let (floor, span) = match self {
            ModificationKind::ParameterAdjustment => (0.7, 0.3),
            ModificationKind::StructureChange => (0.5, 0.5),
            ModificationKind::RuleAddition => (0.6, 0.4),
            ModificationKind::RuleRemoval => (0.4, 0.6),
        };
        floor + rng.gen::<f32>() * span
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfModification {
    pub id: String,
    pub sequence: usize,
    pub timestamp_ms: u128,
    pub kind: ModificationKind,
    pub target_component: String,
    pub modification_tensor: Vec<f32>,
    pub effectiveness_score: f32,
    pub reversible: bool,
}

impl SelfModification {
    /// Synthesize a record for `state`, drawing the adjustment vector and the
    /// effectiveness score from `rng`.
    pub fn synthesize<R: Rng>(state: &SystemState, timestamp_ms: u128, rng: &mut R) -> Self {
        let kind = ModificationKind::for_state(state);
        let modification_tensor = match kind {
            ModificationKind::ParameterAdjustment => (0..MODIFICATION_TENSOR_WIDTH)
                .map(|_| (rng.gen::<f32>() - 0.5) * 0.2)
                .collect(),
            _ => vec![0.0; MODIFICATION_TENSOR_WIDTH],
        };
        let effectiveness_score = kind.effectiveness(rng);
        Self {
            id: format!("modification_{timestamp_ms}"),
            sequence: 0,
            timestamp_ms,
            kind,
            target_component: kind.target_component().to_string(),
            modification_tensor,
            effectiveness_score,
            reversible: effectiveness_score > 0.5,
        }
    }
}

/// Bounded modification buffer with an optional JSONL journal.
#[derive(Debug, Clone)]
pub struct ModificationLog {
    limit: usize,
    sequence: usize,
    entries: VecDeque<SelfModification>,
    journal: Option<PathBuf>,
}

impl ModificationLog {
    pub fn new(limit: usize, journal: Option<PathBuf>) -> Self {
        Self {
            limit: limit.max(1),
            sequence: 0,
            entries: VecDeque::new(),
            journal,
        }
    }

    /// Assign the next sequence number, buffer the record and journal it.
    /// The record is kept in memory even when journaling fails.
    pub fn record(&mut self, mut entry: SelfModification) -> io::Result<&SelfModification> {
        self.sequence += 1;
        entry.sequence = self.sequence;
        entry.id = format!("{}_{}", entry.id, self.sequence);
        self.entries.push_back(entry);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }

        let latest = self.entries.back().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "modification buffer is empty")
        })?;
        if let Some(path) = &self.journal {
            append_json_line(path, latest)?;
        }
        Ok(latest)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SelfModification> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records stamped within `window_ms` of `now_ms`.
    pub fn count_since(&self, now_ms: u128, window_ms: u128) -> usize {
        self.entries
            .iter()
            .filter(|m| now_ms.saturating_sub(m.timestamp_ms) < window_ms)
            .count()
    }

    pub fn reconfigure(&mut self, limit: usize, journal: Option<PathBuf>) {
        self.limit = limit.max(1);
        self.journal = journal;
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::meta::state::ConvergenceStatus;

    fn state(memory: f32, activity: f32) -> SystemState {
        SystemState {
            cognitive_load: 0.1,
            attention_distribution: Vec::new(),
            reasoning_activity: activity,
            memory_usage: memory,
            processing_efficiency: 0.1,
            convergence_status: ConvergenceStatus::Critical,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn kind_tracks_the_strained_resource() {
        assert_eq!(
            ModificationKind::for_state(&state(0.95, 0.0)),
            ModificationKind::StructureChange
        );
        assert_eq!(
            ModificationKind::for_state(&state(0.1, 0.1)),
            ModificationKind::RuleAddition
        );
        assert_eq!(
            ModificationKind::for_state(&state(0.1, 0.9)),
            ModificationKind::ParameterAdjustment
        );
    }

    #[test]
    fn records_are_sequenced_bounded_and_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modifications.jsonl");
        let mut log = ModificationLog::new(3, Some(path.clone()));
        let mut rng = StdRng::seed_from_u64(4);
        for t in 0..5 {
            let entry = SelfModification::synthesize(&state(0.1, 0.9), t, &mut rng);
            assert!((0.7..=1.0).contains(&entry.effectiveness_score));
            log.record(entry).unwrap();
        }

        let sequences: Vec<usize> = log.entries().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
        assert!(log.entries().all(|e| e.reversible));

        let journal = std::fs::read_to_string(&path).unwrap();
        assert_eq!(journal.lines().count(), 5);
        let first: serde_json::Value = serde_json::from_str(journal.lines().next().unwrap()).unwrap();
        assert_eq!(first["kind"], "parameter_adjustment");
        assert_eq!(first["targetComponent"], "meta_cognitive");
    }

    #[test]
    fn count_since_uses_the_window() {
        let mut log = ModificationLog::new(10, None);
        let mut rng = StdRng::seed_from_u64(4);
        for t in [0u128, 30_000, 70_000] {
            log.record(SelfModification::synthesize(&state(0.9, 0.5), t, &mut rng))
                .unwrap();
        }
        assert_eq!(log.count_since(80_000, 60_000), 2);
    }
}
