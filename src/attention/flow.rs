use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Flows older than this are pruned on every effective update.
pub const FLOW_WINDOW: Duration = Duration::from_secs(60);
/// Hard cap on retained flows, applied after the time window.
pub const MAX_FLOWS: usize = 10_000;

/// Pseudo-node standing in for the shared attention bank in rent and wage
/// flows.
pub const BANK_ID: &str = "attention_bank";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowReason {
    Diffusion,
    Rent,
    Wage,
}

/// One recorded transfer of attention between two nodes (or the bank).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttentionFlow {
    pub timestamp_ms: u128,
    pub source_id: String,
    pub target_id: String,
    pub transfer: f32,
    pub reason: FlowReason,
}

/// Rolling flow log bounded by [`FLOW_WINDOW`] and [`MAX_FLOWS`].
#[derive(Debug, Default)]
pub(crate) struct FlowLog {
    entries: VecDeque<(Instant, AttentionFlow)>,
}

impl FlowLog {
    pub fn record(&mut self, at: Instant, flow: AttentionFlow) {
        self.entries.push_back((at, flow));
        if self.entries.len() > MAX_FLOWS {
            self.entries.pop_front();
        }
    }

    pub fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.entries.front() {
            if now.saturating_duration_since(*at) > FLOW_WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn flows(&self) -> impl Iterator<Item = &AttentionFlow> {
        self.entries.iter().map(|(_, flow)| flow)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(transfer: f32) -> AttentionFlow {
        AttentionFlow {
            timestamp_ms: 0,
            source_id: "a".into(),
            target_id: "b".into(),
            transfer,
            reason: FlowReason::Diffusion,
        }
    }

    #[test]
    fn prune_drops_entries_outside_window() {
        let start = Instant::now();
        let mut log = FlowLog::default();
        log.record(start, flow(1.0));
        log.record(start + Duration::from_secs(30), flow(2.0));
        log.prune(start + Duration::from_secs(75));
        let kept: Vec<f32> = log.flows().map(|f| f.transfer).collect();
        assert_eq!(kept, vec![2.0]);
    }

    #[test]
    fn log_is_capped() {
        let now = Instant::now();
        let mut log = FlowLog::default();
        for i in 0..(MAX_FLOWS + 5) {
            log.record(now, flow(i as f32));
        }
        assert_eq!(log.len(), MAX_FLOWS);
        assert_eq!(log.flows().next().map(|f| f.transfer), Some(5.0));
    }
}
