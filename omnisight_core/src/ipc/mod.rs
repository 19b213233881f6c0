//! IPC boundary: shared-memory frame publication, the command/ack pipe,
//! and the status/stats JSON files (§6 "External interfaces"). The
//! publisher owns three double-buffered regions; a separate reader
//! process is out of scope for this core (§1), so `SharedRegion` models
//! only the write side plus a readiness counter a poller can observe.

pub mod command;
pub mod frame;
pub mod status;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::IpcError;
use frame::{DetectionRecord, TimelineSnapshotRecord, TrackRecord};

/// In-process stand-in for a POSIX shared-memory region (§9 "double
/// buffer ordering"). `publish` writes into the inactive slot, then
/// flips `active` with a release store; `read` does an acquire load of
/// `active` first, so it never observes a half-written buffer.
pub struct SharedRegion {
    buffers: [Mutex<Vec<u8>>; 2],
    active: AtomicU64,
    ready_count: AtomicU64,
}

impl SharedRegion {
    pub fn new() -> Self {
        Self { buffers: [Mutex::new(Vec::new()), Mutex::new(Vec::new())], active: AtomicU64::new(0), ready_count: AtomicU64::new(0) }
    }

    pub fn publish(&self, bytes: Vec<u8>) {
        let current = self.active.load(Ordering::Acquire);
        let next = 1 - current;
        *self.buffers[next as usize].lock() = bytes;
        self.active.store(next, Ordering::Release);
        self.ready_count.fetch_add(1, Ordering::Release);
    }

    pub fn read(&self) -> Vec<u8> {
        let idx = self.active.load(Ordering::Acquire);
        self.buffers[idx as usize].lock().clone()
    }

    /// Monotonic counter a poller compares against its last-seen value to
    /// detect a fresh frame without blocking (semaphore stand-in).
    pub fn ready_count(&self) -> u64 {
        self.ready_count.load(Ordering::Acquire)
    }
}

impl Default for SharedRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one shared-memory region plus the monotonic frame counter that
/// region's frames carry (§5 "Detection / track / timeline regions have
/// independent monotonic counters").
pub struct PublishedRegion {
    pub region: SharedRegion,
    next_frame_id: AtomicU64,
}

impl PublishedRegion {
    fn new() -> Self {
        Self { region: SharedRegion::new(), next_frame_id: AtomicU64::new(1) }
    }

    fn next_frame_id(&self) -> u64 {
        self.next_frame_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for PublishedRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the three shared-memory regions, each with its own monotonic
/// frame counter. One instance per camera process; `src/bin/main.rs`
/// publishes into it once per producer tick.
pub struct IpcPublisher {
    pub detections: PublishedRegion,
    pub tracks: PublishedRegion,
    pub timelines: PublishedRegion,
}

impl IpcPublisher {
    pub fn new() -> Self {
        Self { detections: PublishedRegion::new(), tracks: PublishedRegion::new(), timelines: PublishedRegion::new() }
    }

    pub fn publish_detections(&self, timestamp_ms: u64, detections: &[DetectionRecord]) -> Result<(), IpcError> {
        let frame_id = self.detections.next_frame_id();
        let bytes = frame::encode_detection_frame(frame_id, timestamp_ms, detections)?;
        self.detections.region.publish(bytes);
        Ok(())
    }

    pub fn publish_tracks(&self, timestamp_ms: u64, tracks: &[TrackRecord]) -> Result<(), IpcError> {
        let frame_id = self.tracks.next_frame_id();
        let bytes = frame::encode_tracks_frame(frame_id, timestamp_ms, tracks)?;
        self.tracks.region.publish(bytes);
        Ok(())
    }

    pub fn publish_timelines(&self, timestamp_ms: u64, timelines: &[TimelineSnapshotRecord]) -> Result<(), IpcError> {
        let frame_id = self.timelines.next_frame_id();
        let bytes = frame::encode_timelines_frame(frame_id, timestamp_ms, timelines)?;
        self.timelines.region.publish(bytes);
        Ok(())
    }
}

impl Default for IpcPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_detection_frame_is_readable_and_decodes() {
        let publisher = IpcPublisher::new();
        let detections = vec![DetectionRecord { id: 1, class: 1, confidence: 0.5, bbox: [0.0, 0.0, 0.1, 0.1], timestamp_ms: 10 }];
        publisher.publish_detections(10, &detections).unwrap();
        let bytes = publisher.detections.region.read();
        let decoded = frame::decode_detection_frame(&bytes).unwrap();
        assert_eq!(decoded.frame_id, 1);
        assert_eq!(decoded.detections.len(), 1);
    }

    #[test]
    fn frame_ids_are_monotonic_across_publishes() {
        let publisher = IpcPublisher::new();
        publisher.publish_detections(0, &[]).unwrap();
        publisher.publish_detections(1, &[]).unwrap();
        let bytes = publisher.detections.region.read();
        let decoded = frame::decode_detection_frame(&bytes).unwrap();
        assert_eq!(decoded.frame_id, 2);
    }

    #[test]
    fn regions_carry_independent_frame_id_counters() {
        let publisher = IpcPublisher::new();
        publisher.publish_detections(0, &[]).unwrap();
        publisher.publish_detections(0, &[]).unwrap();
        publisher.publish_detections(0, &[]).unwrap();
        publisher.publish_tracks(0, &[]).unwrap();

        let detections = frame::decode_detection_frame(&publisher.detections.region.read()).unwrap();
        let tracks = frame::decode_tracks_frame(&publisher.tracks.region.read()).unwrap();
        assert_eq!(detections.frame_id, 3);
        assert_eq!(tracks.frame_id, 1);
    }

    #[test]
    fn ready_count_advances_on_every_publish() {
        let region = SharedRegion::new();
        assert_eq!(region.ready_count(), 0);
        region.publish(vec![1, 2, 3]);
        region.publish(vec![4, 5, 6]);
        assert_eq!(region.ready_count(), 2);
    }
}
