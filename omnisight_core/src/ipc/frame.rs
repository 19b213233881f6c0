//! Fixed-layout binary encode/decode for the three shared-memory frames
//! (§6 "Shared-memory layout"). Byte order is little-endian throughout;
//! each record is written field-by-field with no inserted padding, which
//! is what the "packed" requirement comes down to once there is no
//! `#[repr(C)]` struct for an external reader to match against directly.
//!
//! The 128-dimension feature vector carried on `Detection`/`Track`
//! in-process is deliberately not placed on the wire here: it exists for
//! re-identification inside this process, no external reader consumes it,
//! and including it would blow the frame size estimates in the IPC
//! contract comments out by an order of magnitude (DESIGN.md).

use crate::error::IpcError;

pub const MAGIC: u32 = 0x4F4D_4E49;
pub const VERSION: u32 = 1;

pub const MAX_DETECTIONS_PER_FRAME: usize = 50;
pub const MAX_TRACKED_OBJECTS: usize = 50;
pub const MAX_TIMELINES: usize = 5;
pub const MAX_EVENTS_PER_TIMELINE: usize = 20;
pub const MAX_INTERVENTIONS_PER_TIMELINE: usize = 10;

const DESCRIPTION_LEN: usize = 256;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn with_capacity(cap: usize) -> Self {
        Self { buf: Vec::with_capacity(cap) }
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn fixed_str(&mut self, s: &str, len: usize) {
        let bytes = s.as_bytes();
        let n = bytes.len().min(len.saturating_sub(1));
        self.buf.extend_from_slice(&bytes[..n]);
        self.buf.resize(self.buf.len() + (len - n), 0);
    }

    fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.buf[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    fn f32(&mut self) -> f32 {
        let v = f32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    fn fixed_str(&mut self, len: usize) -> String {
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end]).into_owned()
    }

}

/// A fixed-width wire record: `ENCODED_LEN` bytes in, `ENCODED_LEN` bytes
/// out, every time, so capacity-bounded arrays can be padded with zeroed
/// slots up to their ceiling.
trait FrameRecord: Sized {
    const ENCODED_LEN: usize;
    fn write(&self, w: &mut Writer);
    fn read(r: &mut Reader) -> Self;
}

#[derive(Debug, Clone)]
pub struct DetectionRecord {
    pub id: u32,
    pub class: u32,
    pub confidence: f32,
    pub bbox: [f32; 4],
    pub timestamp_ms: u64,
}

impl FrameRecord for DetectionRecord {
    const ENCODED_LEN: usize = 4 + 4 + 4 + 16 + 8;

    fn write(&self, w: &mut Writer) {
        w.u32(self.id);
        w.u32(self.class);
        w.f32(self.confidence);
        for v in self.bbox {
            w.f32(v);
        }
        w.u64(self.timestamp_ms);
    }

    fn read(r: &mut Reader) -> Self {
        let id = r.u32();
        let class = r.u32();
        let confidence = r.f32();
        let bbox = [r.f32(), r.f32(), r.f32(), r.f32()];
        let timestamp_ms = r.u64();
        Self { id, class, confidence, bbox, timestamp_ms }
    }
}

#[derive(Debug, Clone)]
pub struct TrackRecord {
    pub track_id: u32,
    pub class: u32,
    pub current_bbox: [f32; 4],
    pub predicted_bbox: [f32; 4],
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub confidence: f32,
    pub frame_count: u32,
    pub miss_count: u32,
    pub behaviors: u32,
    pub threat_score: f32,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
}

impl FrameRecord for TrackRecord {
    const ENCODED_LEN: usize = 4 + 4 + 16 + 16 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 8 + 8;

    fn write(&self, w: &mut Writer) {
        w.u32(self.track_id);
        w.u32(self.class);
        for v in self.current_bbox {
            w.f32(v);
        }
        for v in self.predicted_bbox {
            w.f32(v);
        }
        w.f32(self.velocity_x);
        w.f32(self.velocity_y);
        w.f32(self.confidence);
        w.u32(self.frame_count);
        w.u32(self.miss_count);
        w.u32(self.behaviors);
        w.f32(self.threat_score);
        w.u64(self.first_seen_ms);
        w.u64(self.last_seen_ms);
    }

    fn read(r: &mut Reader) -> Self {
        let track_id = r.u32();
        let class = r.u32();
        let current_bbox = [r.f32(), r.f32(), r.f32(), r.f32()];
        let predicted_bbox = [r.f32(), r.f32(), r.f32(), r.f32()];
        let velocity_x = r.f32();
        let velocity_y = r.f32();
        let confidence = r.f32();
        let frame_count = r.u32();
        let miss_count = r.u32();
        let behaviors = r.u32();
        let threat_score = r.f32();
        let first_seen_ms = r.u64();
        let last_seen_ms = r.u64();
        Self {
            track_id,
            class,
            current_bbox,
            predicted_bbox,
            velocity_x,
            velocity_y,
            confidence,
            frame_count,
            miss_count,
            behaviors,
            threat_score,
            first_seen_ms,
            last_seen_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredictedEventRecord {
    pub event_type: u32,
    pub timestamp_ms: u64,
    pub probability: f32,
    pub severity: u32,
    pub involved_tracks: [u32; 4],
    pub num_involved: u32,
    pub location_x: f32,
    pub location_y: f32,
    pub description: String,
}

impl FrameRecord for PredictedEventRecord {
    const ENCODED_LEN: usize = 4 + 8 + 4 + 4 + 16 + 4 + 4 + 4 + DESCRIPTION_LEN;

    fn write(&self, w: &mut Writer) {
        w.u32(self.event_type);
        w.u64(self.timestamp_ms);
        w.f32(self.probability);
        w.u32(self.severity);
        for t in self.involved_tracks {
            w.u32(t);
        }
        w.u32(self.num_involved);
        w.f32(self.location_x);
        w.f32(self.location_y);
        w.fixed_str(&self.description, DESCRIPTION_LEN);
    }

    fn read(r: &mut Reader) -> Self {
        let event_type = r.u32();
        let timestamp_ms = r.u64();
        let probability = r.f32();
        let severity = r.u32();
        let involved_tracks = [r.u32(), r.u32(), r.u32(), r.u32()];
        let num_involved = r.u32();
        let location_x = r.f32();
        let location_y = r.f32();
        let description = r.fixed_str(DESCRIPTION_LEN);
        Self {
            event_type,
            timestamp_ms,
            probability,
            severity,
            involved_tracks,
            num_involved,
            location_x,
            location_y,
            description,
        }
    }
}

impl Default for PredictedEventRecord {
    fn default() -> Self {
        Self {
            event_type: 0,
            timestamp_ms: 0,
            probability: 0.0,
            severity: 0,
            involved_tracks: [0; 4],
            num_involved: 0,
            location_x: 0.0,
            location_y: 0.0,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InterventionPointRecord {
    pub timestamp_ms: u64,
    pub intervention_type: u32,
    pub effectiveness: f32,
    pub cost: f32,
    pub prevented_event: PredictedEventRecord,
    pub recommendation: String,
}

impl FrameRecord for InterventionPointRecord {
    const ENCODED_LEN: usize = 8 + 4 + 4 + 4 + PredictedEventRecord::ENCODED_LEN + DESCRIPTION_LEN;

    fn write(&self, w: &mut Writer) {
        w.u64(self.timestamp_ms);
        w.u32(self.intervention_type);
        w.f32(self.effectiveness);
        w.f32(self.cost);
        self.prevented_event.write(w);
        w.fixed_str(&self.recommendation, DESCRIPTION_LEN);
    }

    fn read(r: &mut Reader) -> Self {
        let timestamp_ms = r.u64();
        let intervention_type = r.u32();
        let effectiveness = r.f32();
        let cost = r.f32();
        let prevented_event = PredictedEventRecord::read(r);
        let recommendation = r.fixed_str(DESCRIPTION_LEN);
        Self { timestamp_ms, intervention_type, effectiveness, cost, prevented_event, recommendation }
    }
}

impl Default for InterventionPointRecord {
    fn default() -> Self {
        Self {
            timestamp_ms: 0,
            intervention_type: 0,
            effectiveness: 0.0,
            cost: 0.0,
            prevented_event: PredictedEventRecord::default(),
            recommendation: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimelineSnapshotRecord {
    pub timeline_id: u32,
    pub overall_probability: f32,
    pub prediction_start_ms: u64,
    pub prediction_end_ms: u64,
    pub events: Vec<PredictedEventRecord>,
    pub interventions: Vec<InterventionPointRecord>,
    pub worst_case_severity: u32,
    pub total_threat_score: f32,
}

impl FrameRecord for TimelineSnapshotRecord {
    const ENCODED_LEN: usize = 4
        + 4
        + 8
        + 8
        + 4
        + PredictedEventRecord::ENCODED_LEN * MAX_EVENTS_PER_TIMELINE
        + 4
        + InterventionPointRecord::ENCODED_LEN * MAX_INTERVENTIONS_PER_TIMELINE
        + 4
        + 4;

    fn write(&self, w: &mut Writer) {
        w.u32(self.timeline_id);
        w.f32(self.overall_probability);
        w.u64(self.prediction_start_ms);
        w.u64(self.prediction_end_ms);

        let num_events = self.events.len().min(MAX_EVENTS_PER_TIMELINE) as u32;
        w.u32(num_events);
        for i in 0..MAX_EVENTS_PER_TIMELINE {
            match self.events.get(i) {
                Some(e) => e.write(w),
                None => w.zeros(PredictedEventRecord::ENCODED_LEN),
            }
        }

        let num_interventions = self.interventions.len().min(MAX_INTERVENTIONS_PER_TIMELINE) as u32;
        w.u32(num_interventions);
        for i in 0..MAX_INTERVENTIONS_PER_TIMELINE {
            match self.interventions.get(i) {
                Some(p) => p.write(w),
                None => w.zeros(InterventionPointRecord::ENCODED_LEN),
            }
        }

        w.u32(self.worst_case_severity);
        w.f32(self.total_threat_score);
    }

    fn read(r: &mut Reader) -> Self {
        let timeline_id = r.u32();
        let overall_probability = r.f32();
        let prediction_start_ms = r.u64();
        let prediction_end_ms = r.u64();

        let num_events = r.u32() as usize;
        let mut events = Vec::with_capacity(num_events.min(MAX_EVENTS_PER_TIMELINE));
        for i in 0..MAX_EVENTS_PER_TIMELINE {
            let record = PredictedEventRecord::read(r);
            if i < num_events {
                events.push(record);
            }
        }

        let num_interventions = r.u32() as usize;
        let mut interventions = Vec::with_capacity(num_interventions.min(MAX_INTERVENTIONS_PER_TIMELINE));
        for i in 0..MAX_INTERVENTIONS_PER_TIMELINE {
            let record = InterventionPointRecord::read(r);
            if i < num_interventions {
                interventions.push(record);
            }
        }

        let worst_case_severity = r.u32();
        let total_threat_score = r.f32();

        Self {
            timeline_id,
            overall_probability,
            prediction_start_ms,
            prediction_end_ms,
            events,
            interventions,
            worst_case_severity,
            total_threat_score,
        }
    }
}

/// Every region shares this header shape (§5 "Frame layout (per region,
/// bit-exact)"): `magic, version, frame_id, timestamp_ms, count`.
fn header_len() -> usize {
    4 + 4 + 8 + 8 + 4
}

fn finish(w: &mut Writer) {
    let crc = crc32fast::hash(&w.buf);
    w.u32(crc);
    w.zeros(4 * 3);
}

fn verify_and_strip<'a>(buf: &'a [u8], header_len: usize, payload_len: usize) -> Result<&'a [u8], IpcError> {
    let crc_at = header_len + payload_len;
    if buf.len() < crc_at + 4 + 12 {
        return Err(IpcError::BadHeader(format!("frame too short: {} bytes", buf.len())));
    }
    let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    if magic != MAGIC {
        return Err(IpcError::BadHeader(format!("bad magic {magic:08x}")));
    }
    if version != VERSION {
        return Err(IpcError::BadHeader(format!("unsupported version {version}")));
    }
    let stored_crc = u32::from_le_bytes(buf[crc_at..crc_at + 4].try_into().unwrap());
    let computed_crc = crc32fast::hash(&buf[..crc_at]);
    if stored_crc != computed_crc {
        return Err(IpcError::CrcMismatch { expected: stored_crc, actual: computed_crc });
    }
    Ok(buf)
}

pub fn encode_detection_frame(frame_id: u64, timestamp_ms: u64, detections: &[DetectionRecord]) -> Result<Vec<u8>, IpcError> {
    if detections.len() > MAX_DETECTIONS_PER_FRAME {
        return Err(IpcError::PayloadTooLarge(detections.len(), MAX_DETECTIONS_PER_FRAME));
    }
    let payload_len = DetectionRecord::ENCODED_LEN * MAX_DETECTIONS_PER_FRAME;
    let mut w = Writer::with_capacity(header_len() + payload_len + 16);
    w.u32(MAGIC);
    w.u32(VERSION);
    w.u64(frame_id);
    w.u64(timestamp_ms);
    w.u32(detections.len() as u32);
    for i in 0..MAX_DETECTIONS_PER_FRAME {
        match detections.get(i) {
            Some(d) => d.write(&mut w),
            None => w.zeros(DetectionRecord::ENCODED_LEN),
        }
    }
    finish(&mut w);
    Ok(w.buf)
}

pub struct DecodedDetectionFrame {
    pub frame_id: u64,
    pub timestamp_ms: u64,
    pub detections: Vec<DetectionRecord>,
}

pub fn decode_detection_frame(buf: &[u8]) -> Result<DecodedDetectionFrame, IpcError> {
    let payload_len = DetectionRecord::ENCODED_LEN * MAX_DETECTIONS_PER_FRAME;
    verify_and_strip(buf, header_len(), payload_len)?;
    let mut r = Reader::new(buf);
    r.u32();
    r.u32();
    let frame_id = r.u64();
    let timestamp_ms = r.u64();
    let count = r.u32() as usize;
    let mut detections = Vec::with_capacity(count.min(MAX_DETECTIONS_PER_FRAME));
    for i in 0..MAX_DETECTIONS_PER_FRAME {
        let record = DetectionRecord::read(&mut r);
        if i < count {
            detections.push(record);
        }
    }
    Ok(DecodedDetectionFrame { frame_id, timestamp_ms, detections })
}

pub fn encode_tracks_frame(frame_id: u64, timestamp_ms: u64, tracks: &[TrackRecord]) -> Result<Vec<u8>, IpcError> {
    if tracks.len() > MAX_TRACKED_OBJECTS {
        return Err(IpcError::PayloadTooLarge(tracks.len(), MAX_TRACKED_OBJECTS));
    }
    let payload_len = TrackRecord::ENCODED_LEN * MAX_TRACKED_OBJECTS;
    let mut w = Writer::with_capacity(header_len() + payload_len + 16);
    w.u32(MAGIC);
    w.u32(VERSION);
    w.u64(frame_id);
    w.u64(timestamp_ms);
    w.u32(tracks.len() as u32);
    for i in 0..MAX_TRACKED_OBJECTS {
        match tracks.get(i) {
            Some(t) => t.write(&mut w),
            None => w.zeros(TrackRecord::ENCODED_LEN),
        }
    }
    finish(&mut w);
    Ok(w.buf)
}

pub struct DecodedTracksFrame {
    pub frame_id: u64,
    pub timestamp_ms: u64,
    pub tracks: Vec<TrackRecord>,
}

pub fn decode_tracks_frame(buf: &[u8]) -> Result<DecodedTracksFrame, IpcError> {
    let payload_len = TrackRecord::ENCODED_LEN * MAX_TRACKED_OBJECTS;
    verify_and_strip(buf, header_len(), payload_len)?;
    let mut r = Reader::new(buf);
    r.u32();
    r.u32();
    let frame_id = r.u64();
    let timestamp_ms = r.u64();
    let count = r.u32() as usize;
    let mut tracks = Vec::with_capacity(count.min(MAX_TRACKED_OBJECTS));
    for i in 0..MAX_TRACKED_OBJECTS {
        let record = TrackRecord::read(&mut r);
        if i < count {
            tracks.push(record);
        }
    }
    Ok(DecodedTracksFrame { frame_id, timestamp_ms, tracks })
}

pub fn encode_timelines_frame(frame_id: u64, timestamp_ms: u64, timelines: &[TimelineSnapshotRecord]) -> Result<Vec<u8>, IpcError> {
    if timelines.len() > MAX_TIMELINES {
        return Err(IpcError::PayloadTooLarge(timelines.len(), MAX_TIMELINES));
    }
    let payload_len = TimelineSnapshotRecord::ENCODED_LEN * MAX_TIMELINES;
    let mut w = Writer::with_capacity(header_len() + payload_len + 16);
    w.u32(MAGIC);
    w.u32(VERSION);
    w.u64(frame_id);
    w.u64(timestamp_ms);
    w.u32(timelines.len() as u32);
    for i in 0..MAX_TIMELINES {
        match timelines.get(i) {
            Some(t) => t.write(&mut w),
            None => w.zeros(TimelineSnapshotRecord::ENCODED_LEN),
        }
    }
    finish(&mut w);
    Ok(w.buf)
}

pub struct DecodedTimelinesFrame {
    pub frame_id: u64,
    pub timestamp_ms: u64,
    pub timelines: Vec<TimelineSnapshotRecord>,
}

pub fn decode_timelines_frame(buf: &[u8]) -> Result<DecodedTimelinesFrame, IpcError> {
    let payload_len = TimelineSnapshotRecord::ENCODED_LEN * MAX_TIMELINES;
    verify_and_strip(buf, header_len(), payload_len)?;
    let mut r = Reader::new(buf);
    r.u32();
    r.u32();
    let frame_id = r.u64();
    let timestamp_ms = r.u64();
    let count = r.u32() as usize;
    let mut timelines = Vec::with_capacity(count.min(MAX_TIMELINES));
    for i in 0..MAX_TIMELINES {
        let record = TimelineSnapshotRecord::read(&mut r);
        if i < count {
            timelines.push(record);
        }
    }
    Ok(DecodedTimelinesFrame { frame_id, timestamp_ms, timelines })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_detection(id: u32) -> DetectionRecord {
        DetectionRecord { id, class: 1, confidence: 0.8, bbox: [0.1, 0.2, 0.3, 0.4], timestamp_ms: 1234 }
    }

    #[test]
    fn detection_frame_round_trips() {
        let detections = vec![sample_detection(1), sample_detection(2)];
        let encoded = encode_detection_frame(7, 1000, &detections).unwrap();
        let decoded = decode_detection_frame(&encoded).unwrap();
        assert_eq!(decoded.frame_id, 7);
        assert_eq!(decoded.timestamp_ms, 1000);
        assert_eq!(decoded.detections.len(), 2);
        assert_eq!(decoded.detections[1].id, 2);
    }

    #[test]
    fn oversized_payload_is_rejected_before_encoding() {
        let detections: Vec<DetectionRecord> = (0..51).map(sample_detection).collect();
        let err = encode_detection_frame(1, 0, &detections);
        assert!(matches!(err, Err(IpcError::PayloadTooLarge(51, MAX_DETECTIONS_PER_FRAME))));
    }

    #[test]
    fn corrupted_byte_fails_crc_check() {
        let detections = vec![sample_detection(1)];
        let mut encoded = encode_detection_frame(1, 0, &detections).unwrap();
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xFF;
        let err = decode_detection_frame(&encoded);
        assert!(matches!(err, Err(IpcError::CrcMismatch { .. })));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let detections = vec![sample_detection(1)];
        let mut encoded = encode_detection_frame(1, 0, &detections).unwrap();
        encoded[0] = 0;
        let err = decode_detection_frame(&encoded);
        assert!(matches!(err, Err(IpcError::BadHeader(_))));
    }

    #[test]
    fn tracks_frame_round_trips_with_independent_frame_id() {
        let track = TrackRecord {
            track_id: 3,
            class: 1,
            current_bbox: [0.1, 0.2, 0.3, 0.4],
            predicted_bbox: [0.1, 0.2, 0.3, 0.4],
            velocity_x: 0.0,
            velocity_y: 0.0,
            confidence: 0.9,
            frame_count: 10,
            miss_count: 0,
            behaviors: 0,
            threat_score: 0.1,
            first_seen_ms: 0,
            last_seen_ms: 1000,
        };
        let encoded = encode_tracks_frame(5, 1000, &[track]).unwrap();
        let decoded = decode_tracks_frame(&encoded).unwrap();
        assert_eq!(decoded.frame_id, 5);
        assert_eq!(decoded.timestamp_ms, 1000);
        assert_eq!(decoded.tracks.len(), 1);
        assert_eq!(decoded.tracks[0].track_id, 3);
    }

    #[test]
    fn timeline_snapshot_round_trips_through_fixed_capacity_arrays() {
        let event = PredictedEventRecord {
            event_type: 2,
            timestamp_ms: 5000,
            probability: 0.7,
            severity: 3,
            involved_tracks: [1, 2, 0, 0],
            num_involved: 2,
            location_x: 0.5,
            location_y: 0.5,
            description: "predicted theft".to_string(),
        };
        let intervention = InterventionPointRecord {
            timestamp_ms: 2000,
            intervention_type: 0,
            effectiveness: 0.8,
            cost: 0.3,
            prevented_event: event.clone(),
            recommendation: "alert security".to_string(),
        };
        let snapshot = TimelineSnapshotRecord {
            timeline_id: 1,
            overall_probability: 0.9,
            prediction_start_ms: 0,
            prediction_end_ms: 300_000,
            events: vec![event],
            interventions: vec![intervention],
            worst_case_severity: 3,
            total_threat_score: 0.6,
        };
        let encoded = encode_timelines_frame(1, 10, &[snapshot]).unwrap();
        let decoded = decode_timelines_frame(&encoded).unwrap();
        assert_eq!(decoded.frame_id, 1);
        assert_eq!(decoded.timelines.len(), 1);
        assert_eq!(decoded.timelines[0].events.len(), 1);
        assert_eq!(decoded.timelines[0].events[0].description, "predicted theft");
        assert_eq!(decoded.timelines[0].interventions[0].recommendation, "alert security");
    }
}
