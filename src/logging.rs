//! JSON line-delimited journals.
//!
//! The kernel reports through `tracing` events; these helpers additionally
//! append machine-readable records to files the host opts into through
//! configuration.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Append `value` as one JSON line, creating parent directories as needed.
pub fn append_json_line<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    serde_json::to_writer(&mut file, value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    file.write_all(b"\n")
}

pub fn timestamp_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// One completed kernel tick.
#[derive(Debug, Clone, Serialize)]
pub struct CycleLogEntry {
    pub cycle: u64,
    pub timestamp_ms: u128,
    pub cycle_duration_ms: f64,
    pub node_count: usize,
    pub link_count: usize,
    pub total_attention: f32,
    pub attention_entropy: f32,
    pub active_chains: usize,
    pub average_confidence: f32,
    pub system_coherence: f32,
    pub convergence_status: String,
    pub memory_usage_bytes: usize,
}

pub fn log_cycle<P: AsRef<Path>>(path: P, entry: &CycleLogEntry) -> io::Result<()> {
    append_json_line(path, entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_entries_append_one_line_each() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cycles.jsonl");
        let entry = CycleLogEntry {
            cycle: 1,
            timestamp_ms: timestamp_ms(),
            cycle_duration_ms: 0.5,
            node_count: 3,
            link_count: 1,
            total_attention: 1.0,
            attention_entropy: 1.5,
            active_chains: 2,
            average_confidence: 0.9,
            system_coherence: 0.4,
            convergence_status: "stable".into(),
            memory_usage_bytes: 2048,
        };
        log_cycle(&path, &entry).unwrap();
        log_cycle(&path, &CycleLogEntry { cycle: 2, ..entry }).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["cycle"], 2);
        assert_eq!(parsed["convergence_status"], "stable");
    }
}
