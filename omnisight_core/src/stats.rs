//! Monotonic counters shared between the producer loop and the command
//! thread (§5 "Shared resources": "the stats mutex protects only
//! monotonic counters"). A `parking_lot::Mutex` guards a plain struct
//! rather than a pile of individual atomics, since every counter is
//! always read/written together when the stats file is refreshed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub frames_per_second: f32,
    pub tracked_objects: u32,
    pub dropped_frames: u64,
    pub active_timelines: u32,
    pub events_predicted: u64,
    pub interventions_suggested: u64,
    pub swarm_neighbors: u32,
    pub network_health: f32,

    pub input_invalid_count: u64,
    pub resource_exhausted_count: u64,
    pub ipc_transient_errors: u64,
    pub commands_malformed: u64,
    pub commands_processed: u64,
}

/// Thread-safe handle shared between the producer loop and the
/// command-listener thread.
#[derive(Default)]
pub struct SharedStats {
    inner: Mutex<PipelineStats>,
}

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PipelineStats {
        self.inner.lock().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut PipelineStats)) {
        f(&mut self.inner.lock());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_mutates_under_lock() {
        let stats = SharedStats::new();
        stats.update(|s| s.frames_processed += 1);
        stats.update(|s| s.frames_processed += 1);
        assert_eq!(stats.snapshot().frames_processed, 2);
    }
}
