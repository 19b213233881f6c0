//! Atomic JSON status/stats writers (§6 "Status path" / "Stats path").
//! Every write goes to a sibling `.tmp` path first and is renamed into
//! place, so a concurrent reader never observes a half-written file
//! (generalizes the write-then-rename report style used elsewhere in
//! this crate's lineage for on-disk artifacts).

use serde::{Deserialize, Serialize};

use crate::error::IpcError;
use crate::stats::PipelineStats;

/// Process lifecycle phase reported in the status snapshot (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Stopping,
    Error,
}

/// `{timestamp, status, uptime_ms, version, pid}` (§6 "Status path").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: u64,
    pub status: ProcessStatus,
    pub uptime_ms: u64,
    pub version: String,
    pub pid: u32,
}

impl StatusSnapshot {
    pub fn new(status: ProcessStatus, now_ms: u64, started_at_ms: u64) -> Self {
        Self {
            timestamp: now_ms,
            status,
            uptime_ms: now_ms.saturating_sub(started_at_ms),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
        }
    }
}

pub fn write_stats_atomic(path: &str, stats: &PipelineStats) -> Result<(), IpcError> {
    write_json_atomic(path, stats)
}

pub fn write_status_atomic(path: &str, status: &StatusSnapshot) -> Result<(), IpcError> {
    write_json_atomic(path, status)
}

fn write_json_atomic<T: Serialize>(path: &str, value: &T) -> Result<(), IpcError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| IpcError::MalformedCommand(e.to_string()))?;
    let tmp_path = format!("{path}.tmp");
    std::fs::write(&tmp_path, text)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_write_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("omnisight-status-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("stats.json");
        let path = path.to_str().unwrap();

        let mut stats = PipelineStats::default();
        stats.frames_processed = 42;
        write_stats_atomic(path, &stats).unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["frames_processed"], 42);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn status_write_contains_status_field() {
        let dir = std::env::temp_dir().join(format!("omnisight-status-test2-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("status.json");
        let path = path.to_str().unwrap();

        let snapshot = StatusSnapshot::new(ProcessStatus::Running, 1_500, 1_000);
        write_status_atomic(path, &snapshot).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["status"], "running");
        assert_eq!(parsed["uptime_ms"], 500);
        assert_eq!(parsed["pid"], std::process::id());

        std::fs::remove_dir_all(&dir).ok();
    }
}
