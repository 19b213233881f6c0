//! Detection-to-track association (Hungarian assignment on an IoU cost
//! matrix) and per-track Kalman-filtered motion state.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TrackingError;
use crate::geometry::BoundingBox;
use crate::kalman::KalmanFilter;

/// Object class carried on detections and tracks (§3.1). Used for
/// class-gated association and by the event predictor's per-type rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectClass {
    Unknown,
    Person,
    Vehicle,
    Face,
    Package,
    Animal,
}

bitflags::bitflags! {
    /// Behavior bitset (§3.1). Only `LOITERING`/`RUNNING`/`SUSPICIOUS_MOVEMENT`
    /// carry a threat-score weight in §4.2; the remaining bits are read by
    /// the event predictor and the swarm hand-off.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BehaviorFlags: u8 {
        const NORMAL = 0x00;
        const LOITERING = 0x01;
        const RUNNING = 0x02;
        const CONCEALING = 0x04;
        const SUSPICIOUS_MOVEMENT = 0x08;
        const REPEATED_PASSES = 0x10;
        const EXTENDED_OBSERVATION = 0x20;
    }
}

impl Default for BehaviorFlags {
    fn default() -> Self {
        BehaviorFlags::NORMAL
    }
}

/// A single detection produced by the (external) inference runtime for
/// one frame.
#[derive(Debug, Clone)]
pub struct Detection {
    pub id: u32,
    pub class: ObjectClass,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub timestamp_ms: u64,
    pub features: [f32; 128],
}

impl Detection {
    pub fn is_valid(&self) -> bool {
        self.bbox.is_valid() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// A persistent track: Kalman-filtered motion state plus lifecycle
/// counters and the fields the behavior analyzer annotates in place.
#[derive(Debug, Clone)]
pub struct Track {
    pub track_id: u32,
    pub class: ObjectClass,
    pub kalman: KalmanFilter,
    pub hits: u32,
    pub age: u32,
    pub since_update: u32,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub features: [f32; 128],
    pub behaviors: BehaviorFlags,
    pub threat: f32,
    /// Tracking confidence, seeded from the last matched detection's
    /// confidence. Distinct from `threat`, which is the behavior
    /// analyzer's suspicion score.
    pub confidence: f32,
}

impl Track {
    fn new(id: u32, detection: &Detection) -> Self {
        Self {
            track_id: id,
            class: detection.class,
            kalman: KalmanFilter::new(&detection.bbox),
            hits: 1,
            age: 0,
            since_update: 0,
            first_seen_ms: detection.timestamp_ms,
            last_seen_ms: detection.timestamp_ms,
            features: detection.features,
            behaviors: BehaviorFlags::NORMAL,
            threat: 0.0,
            confidence: detection.confidence,
        }
    }

    pub fn predicted_bbox(&self) -> BoundingBox {
        self.kalman.bbox()
    }

    pub fn velocity(&self) -> (f64, f64) {
        self.kalman.velocity()
    }

    /// A track is eligible for emission once it has accumulated enough
    /// hits and was updated this tick (§4.1).
    pub fn is_confirmed(&self, min_hits: u32) -> bool {
        self.hits >= min_hits && self.since_update == 0
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub iou_threshold: f32,
    pub min_hits: u32,
    pub max_age: u32,
    pub max_tracks: usize,
    pub feature_similarity_weight: f32,
    pub frame_period_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            min_hits: 3,
            max_age: 30,
            max_tracks: 50,
            feature_similarity_weight: 0.0,
            frame_period_ms: 100,
        }
    }
}

fn cosine_similarity(a: &[f32; 128], b: &[f32; 128]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for i in 0..128 {
        dot += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    if na <= 0.0 || nb <= 0.0 {
        0.0
    } else {
        (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
    }
}

static ID_COUNTER: AtomicU32 = AtomicU32::new(1);

fn next_track_id() -> u32 {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

pub struct Tracker {
    pub config: TrackerConfig,
    tracks: Vec<Track>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config, tracks: Vec::new() }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Mutable access so the behavior analyzer can annotate `behaviors`
    /// and `threat` on each confirmed track in place after `update`.
    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    /// Run one association tick: predict, associate, apply. Returns the
    /// set of confirmed tracks (§4.1 contract) by index into `self.tracks`
    /// after the update, not a copy, so callers can mutate behavior state
    /// in place.
    pub fn update(&mut self, detections: &[Detection], t_ms: u64) -> Result<Vec<u32>, TrackingError> {
        let dt = self.config.frame_period_ms as f64 / 1000.0;

        let valid: Vec<&Detection> = detections.iter().filter(|d| d.is_valid()).collect();

        for track in &mut self.tracks {
            track.kalman.predict(dt);
            track.age += 1;
        }

        let cost = self.build_cost_matrix(&valid);
        let assignment = solve_assignment(&cost);

        let mut matched_tracks = vec![false; self.tracks.len()];
        let mut matched_detections = vec![false; valid.len()];

        for (ti, dij) in assignment.iter().enumerate() {
            if let Some(dj) = dij {
                if cost[ti][*dj].is_finite() {
                    matched_tracks[ti] = true;
                    matched_detections[*dj] = true;
                    let det = valid[*dj];
                    let track = &mut self.tracks[ti];
                    track.kalman.update(KalmanFilter::measurement_from_bbox(&det.bbox));
                    track.hits += 1;
                    track.since_update = 0;
                    track.last_seen_ms = t_ms;
                    track.features = det.features;
                }
            }
        }

        for (ti, matched) in matched_tracks.iter().enumerate() {
            if !matched {
                self.tracks[ti].since_update += 1;
            }
        }

        self.tracks.retain(|t| t.since_update <= self.config.max_age);

        for (dj, matched) in matched_detections.iter().enumerate() {
            if !matched {
                if self.tracks.len() >= self.config.max_tracks {
                    continue;
                }
                let id = next_track_id();
                self.tracks.push(Track::new(id, valid[dj]));
            }
        }

        let min_hits = self.config.min_hits;
        Ok(self
            .tracks
            .iter()
            .filter(|t| t.is_confirmed(min_hits))
            .map(|t| t.track_id)
            .collect())
    }

    fn build_cost_matrix(&self, detections: &[&Detection]) -> Vec<Vec<f32>> {
        let w_feat = self.config.feature_similarity_weight;
        self.tracks
            .iter()
            .map(|track| {
                let predicted = track.predicted_bbox();
                detections
                    .iter()
                    .map(|det| {
                        if det.class != track.class {
                            return f32::INFINITY;
                        }
                        let iou = predicted.iou(&det.bbox);
                        if iou < self.config.iou_threshold {
                            return f32::INFINITY;
                        }
                        if w_feat > 0.0 {
                            let sim = cosine_similarity(&track.features, &det.features);
                            1.0 - (1.0 - w_feat) * iou - w_feat * sim
                        } else {
                            1.0 - iou
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

/// Solve a rectangular minimum-cost assignment. `cost[i][j] = +inf` marks a
/// forbidden pair. Returns, for each row, the assigned column (or `None`
/// if the row is unmatched because every candidate was forbidden or the
/// matrix is wider/narrower than it).
///
/// Implemented as the classic O(n^3) Hungarian (Kuhn-Munkres) algorithm on
/// a square padded matrix; ties are broken by ascending index, matching
/// §4.1's tie-breaking rule, since the algorithm scans rows/columns in
/// ascending order throughout.
fn solve_assignment(cost: &[Vec<f32>]) -> Vec<Option<usize>> {
    let n_rows = cost.len();
    if n_rows == 0 {
        return Vec::new();
    }
    let n_cols = cost[0].len();
    if n_cols == 0 {
        return vec![None; n_rows];
    }

    let n = n_rows.max(n_cols);
    const BIG: f64 = 1e12;
    let mut a = vec![vec![BIG; n]; n];
    for i in 0..n_rows {
        for j in 0..n_cols {
            let c = cost[i][j];
            a[i][j] = if c.is_finite() { c as f64 } else { BIG };
        }
    }

    // Jonker-Volgenant-free textbook Hungarian via the Munkres potential
    // method (u/v potentials + augmenting paths), 1-indexed internally.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    let mut p = vec![0usize; n + 1]; // p[j] = row assigned to column j
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=n {
                if !used[j] {
                    let cur = a[i0 - 1][j - 1] - u[i0] - v[j];
                    if cur < minv[j] {
                        minv[j] = cur;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut result = vec![None; n_rows];
    for j in 1..=n {
        let i = p[j];
        if i >= 1 && i <= n_rows && j - 1 < n_cols {
            result[i - 1] = Some(j - 1);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(id: u32, bbox: BoundingBox, t_ms: u64) -> Detection {
        Detection {
            id,
            class: ObjectClass::Person,
            confidence: 0.95,
            bbox,
            timestamp_ms: t_ms,
            features: [0.0; 128],
        }
    }

    #[test]
    fn bootstrap_one_track() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let bbox = BoundingBox::new(0.10, 0.10, 0.20, 0.30);

        let mut confirmed = Vec::new();
        for t in [0u64, 100, 200, 300] {
            confirmed = tracker.update(&[det(1, bbox, t)], t).unwrap();
        }
        assert_eq!(confirmed.len(), 1);
        let track = tracker.tracks().iter().find(|t| t.track_id == confirmed[0]).unwrap();
        assert_eq!(track.hits, 4);
        let (vx, vy) = track.velocity();
        assert!(vx.abs() < 1e-2 && vy.abs() < 1e-2);
    }

    #[test]
    fn track_ids_are_monotonic_and_not_reused() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let b1 = BoundingBox::new(0.0, 0.0, 0.1, 0.1);
        let b2 = BoundingBox::new(0.8, 0.8, 0.1, 0.1);
        tracker.update(&[det(1, b1, 0)], 0).unwrap();
        let ids_before: Vec<u32> = tracker.tracks().iter().map(|t| t.track_id).collect();
        tracker.update(&[det(2, b2, 100)], 100).unwrap();
        let ids_after: Vec<u32> = tracker.tracks().iter().map(|t| t.track_id).collect();
        assert!(ids_after.iter().filter(|id| ids_before.contains(id)).count() == ids_before.len());
        assert!(ids_after.len() > ids_before.len());
    }

    #[test]
    fn empty_detections_age_all_tracks() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let bbox = BoundingBox::new(0.1, 0.1, 0.1, 0.1);
        tracker.update(&[det(1, bbox, 0)], 0).unwrap();
        tracker.update(&[], 100).unwrap();
        assert_eq!(tracker.tracks()[0].since_update, 1);
    }

    #[test]
    fn track_removed_after_max_age_exceeded() {
        let mut config = TrackerConfig::default();
        config.max_age = 2;
        let mut tracker = Tracker::new(config);
        let bbox = BoundingBox::new(0.1, 0.1, 0.1, 0.1);
        tracker.update(&[det(1, bbox, 0)], 0).unwrap();
        for t in 1..=4u64 {
            tracker.update(&[], t * 100).unwrap();
        }
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn class_mismatch_forbids_association() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let bbox = BoundingBox::new(0.1, 0.1, 0.1, 0.1);
        tracker.update(&[det(1, bbox, 0)], 0).unwrap();
        let original_id = tracker.tracks()[0].track_id;

        let mut vehicle = det(2, bbox, 100);
        vehicle.class = ObjectClass::Vehicle;
        tracker.update(&[vehicle], 100).unwrap();

        assert_eq!(tracker.tracks().len(), 2);
        assert!(tracker.tracks().iter().any(|t| t.track_id == original_id));
    }

    #[test]
    fn repeated_identical_frame_does_not_double_advance() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let bbox = BoundingBox::new(0.2, 0.2, 0.1, 0.1);
        tracker.update(&[det(1, bbox, 0)], 0).unwrap();
        tracker.update(&[det(1, bbox, 100)], 100).unwrap();
        let hits_after_two = tracker.tracks()[0].hits;
        tracker.update(&[det(1, bbox, 200)], 200).unwrap();
        assert_eq!(tracker.tracks()[0].hits, hits_after_two + 1);
        assert_eq!(tracker.tracks()[0].since_update, 0);
    }
}
