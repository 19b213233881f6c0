//! Rolling per-track position history, pattern detectors (loitering /
//! running / zigzag), and the weighted threat score.

use std::collections::HashMap;

use crate::geometry::euclidean_distance;
use crate::tracker::{BehaviorFlags, Track};

const HISTORY_CAPACITY: usize = 60;
const GRID_SIZE: usize = 10;
const MAX_HISTORIES: usize = 100;

#[derive(Debug, Clone, Copy)]
struct PositionSample {
    x: f32,
    y: f32,
    t_ms: u64,
    speed: f32,
}

/// Fixed-capacity ring buffer of recent position samples for one track.
#[derive(Debug, Clone)]
struct TrackHistory {
    samples: Vec<PositionSample>,
    head: usize,
    first_seen_ms: u64,
    last_update_ms: u64,
    visited_cells: HashMap<(u8, u8), u8>,
}

impl TrackHistory {
    fn new(t_ms: u64) -> Self {
        Self {
            samples: Vec::with_capacity(HISTORY_CAPACITY),
            head: 0,
            first_seen_ms: t_ms,
            last_update_ms: t_ms,
            visited_cells: HashMap::new(),
        }
    }

    fn push(&mut self, x: f32, y: f32, t_ms: u64) {
        let speed = if let Some(prev) = self.latest() {
            let dt_s = (t_ms.saturating_sub(prev.t_ms)) as f32 / 1000.0;
            if dt_s > 0.0 {
                euclidean_distance((x, y), (prev.x, prev.y)) / dt_s
            } else {
                0.0
            }
        } else {
            0.0
        };

        let sample = PositionSample { x, y, t_ms, speed };
        if self.samples.len() < HISTORY_CAPACITY {
            self.samples.push(sample);
        } else {
            self.samples[self.head] = sample;
            self.head = (self.head + 1) % HISTORY_CAPACITY;
        }
        self.last_update_ms = t_ms;

        let cell = (
            (x.clamp(0.0, 0.999_999) * GRID_SIZE as f32) as u8,
            (y.clamp(0.0, 0.999_999) * GRID_SIZE as f32) as u8,
        );
        *self.visited_cells.entry(cell).or_insert(0) += 1;
    }

    /// Samples in chronological order.
    fn ordered(&self) -> Vec<PositionSample> {
        if self.samples.len() < HISTORY_CAPACITY {
            self.samples.clone()
        } else {
            let mut out = Vec::with_capacity(HISTORY_CAPACITY);
            out.extend_from_slice(&self.samples[self.head..]);
            out.extend_from_slice(&self.samples[..self.head]);
            out
        }
    }

    fn latest(&self) -> Option<PositionSample> {
        self.ordered().last().copied()
    }

    fn within_window(&self, now_ms: u64, window_ms: u64) -> Vec<PositionSample> {
        self.ordered()
            .into_iter()
            .filter(|s| now_ms.saturating_sub(s.t_ms) <= window_ms)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct BehaviorAnalyzerConfig {
    pub loitering_dwell_time_ms: u64,
    pub loitering_radius_meters: f32,
    pub loitering_velocity_threshold: f32,
    pub running_velocity_threshold: f32,
    pub running_duration_ms: u64,
    pub zigzag_threshold_degrees: f32,
    pub zigzag_count_threshold: u32,
    pub meters_per_normalized_unit: f32,
    pub weight_loitering: f32,
    pub weight_running: f32,
    pub weight_unusual: f32,
    pub weight_dwell_bonus: f32,
}

impl Default for BehaviorAnalyzerConfig {
    fn default() -> Self {
        Self {
            loitering_dwell_time_ms: 30_000,
            loitering_radius_meters: 2.0,
            loitering_velocity_threshold: 0.5,
            running_velocity_threshold: 3.0,
            running_duration_ms: 1000,
            zigzag_threshold_degrees: 45.0,
            zigzag_count_threshold: 5,
            meters_per_normalized_unit: 10.0,
            weight_loitering: 0.3,
            weight_running: 0.4,
            weight_unusual: 0.5,
            weight_dwell_bonus: 0.2,
        }
    }
}

pub struct BehaviorAnalyzer {
    config: BehaviorAnalyzerConfig,
    histories: HashMap<u32, TrackHistory>,
}

impl BehaviorAnalyzer {
    pub fn new(config: BehaviorAnalyzerConfig) -> Self {
        Self { config, histories: HashMap::new() }
    }

    pub fn clear(&mut self, track_id: u32) {
        self.histories.remove(&track_id);
    }

    /// Drop histories whose `last_update_ms` has fallen behind `now_ms` by
    /// more than `max_idle_ms`, and if still over capacity, evict the
    /// least-recently-updated entries (§4.2 garbage collection).
    pub fn garbage_collect(&mut self, now_ms: u64, max_idle_ms: u64) {
        self.histories
            .retain(|_, h| now_ms.saturating_sub(h.last_update_ms) <= max_idle_ms);

        if self.histories.len() > MAX_HISTORIES {
            let mut by_age: Vec<(u32, u64)> =
                self.histories.iter().map(|(id, h)| (*id, h.last_update_ms)).collect();
            by_age.sort_by_key(|(_, t)| *t);
            let overflow = self.histories.len() - MAX_HISTORIES;
            for (id, _) in by_age.into_iter().take(overflow) {
                self.histories.remove(&id);
            }
        }
    }

    /// Update history for a track's latest position and recompute its
    /// behavior flags and threat score in place.
    pub fn analyze(&mut self, track: &mut Track, now_ms: u64) {
        let (cx, cy) = {
            let bbox = track.predicted_bbox();
            bbox.center()
        };

        let history = self
            .histories
            .entry(track.track_id)
            .or_insert_with(|| TrackHistory::new(now_ms));
        history.push(cx, cy, now_ms);

        let mut flags = BehaviorFlags::NORMAL;
        let mut score = 0.0f32;

        if self.detect_loitering(history, now_ms) {
            flags |= BehaviorFlags::LOITERING;
            score += self.config.weight_loitering;
        }
        if self.detect_running(history, now_ms) {
            flags |= BehaviorFlags::RUNNING;
            score += self.config.weight_running;
        }
        if self.detect_zigzag(history, now_ms) {
            flags |= BehaviorFlags::SUSPICIOUS_MOVEMENT;
            score += self.config.weight_unusual;
        }
        if self.detect_repeated_passes(history) {
            flags |= BehaviorFlags::REPEATED_PASSES;
        }
        if now_ms.saturating_sub(history.first_seen_ms) >= self.config.loitering_dwell_time_ms
            && !flags.contains(BehaviorFlags::LOITERING)
        {
            flags |= BehaviorFlags::EXTENDED_OBSERVATION;
        }
        if flags.contains(BehaviorFlags::LOITERING)
            && now_ms.saturating_sub(history.first_seen_ms) >= self.config.loitering_dwell_time_ms
        {
            score += self.config.weight_dwell_bonus;
        }

        track.behaviors = flags;
        track.threat = score.clamp(0.0, 1.0);
    }

    fn detect_loitering(&self, history: &TrackHistory, now_ms: u64) -> bool {
        let window = history.within_window(now_ms, self.config.loitering_dwell_time_ms);
        if window.is_empty() {
            return false;
        }
        let span = window.last().unwrap().t_ms - window.first().unwrap().t_ms;
        if span < self.config.loitering_dwell_time_ms {
            return false;
        }

        let mut max_dist = 0.0f32;
        for i in 0..window.len() {
            for j in (i + 1)..window.len() {
                let d = euclidean_distance((window[i].x, window[i].y), (window[j].x, window[j].y));
                if d > max_dist {
                    max_dist = d;
                }
            }
        }
        let max_dist_m = max_dist * self.config.meters_per_normalized_unit;

        let mean_speed_norm: f32 = window.iter().map(|s| s.speed).sum::<f32>() / window.len() as f32;
        let mean_speed_ms = mean_speed_norm * self.config.meters_per_normalized_unit;

        max_dist_m < self.config.loitering_radius_meters
            && mean_speed_ms < self.config.loitering_velocity_threshold
    }

    fn detect_running(&self, history: &TrackHistory, now_ms: u64) -> bool {
        let window = history.within_window(now_ms, self.config.running_duration_ms);
        if window.len() < 2 {
            return false;
        }
        let span = window.last().unwrap().t_ms - window.first().unwrap().t_ms;
        if span < self.config.running_duration_ms {
            return false;
        }
        window
            .iter()
            .all(|s| s.speed * self.config.meters_per_normalized_unit > self.config.running_velocity_threshold)
    }

    fn detect_zigzag(&self, history: &TrackHistory, now_ms: u64) -> bool {
        let window = history.within_window(now_ms, self.config.loitering_dwell_time_ms);
        if window.len() < 3 {
            return false;
        }
        let mut heading_changes = 0u32;
        for triple in window.windows(3) {
            let (a, b, c) = (triple[0], triple[1], triple[2]);
            let v1 = (b.x - a.x, b.y - a.y);
            let v2 = (c.x - b.x, c.y - b.y);
            let n1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
            let n2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
            if n1 < 1e-6 || n2 < 1e-6 {
                continue;
            }
            let cos_theta = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
            let angle_deg = cos_theta.acos().to_degrees();
            if angle_deg > self.config.zigzag_threshold_degrees {
                heading_changes += 1;
            }
        }
        heading_changes >= self.config.zigzag_count_threshold
    }

    fn detect_repeated_passes(&self, history: &TrackHistory) -> bool {
        history.visited_cells.values().any(|count| *count >= 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::kalman::KalmanFilter;
    use crate::tracker::ObjectClass;

    fn make_track(bbox: BoundingBox) -> Track {
        Track {
            track_id: 1,
            class: ObjectClass::Person,
            kalman: KalmanFilter::new(&bbox),
            hits: 3,
            age: 3,
            since_update: 0,
            first_seen_ms: 0,
            last_seen_ms: 0,
            features: [0.0; 128],
            behaviors: BehaviorFlags::NORMAL,
            threat: 0.0,
            confidence: 0.9,
        }
    }

    #[test]
    fn loitering_detected_after_dwell_window() {
        let mut analyzer = BehaviorAnalyzer::new(BehaviorAnalyzerConfig::default());
        let bbox = BoundingBox::new(0.495, 0.495, 0.01, 0.01);
        let mut track = make_track(bbox);

        // oscillate within a tiny radius for 31 seconds (31 samples, 1s apart)
        for i in 0..=31u64 {
            let jitter = if i % 2 == 0 { 0.0 } else { 0.0005 };
            let b = BoundingBox::new(0.495 + jitter, 0.495, 0.01, 0.01);
            track.kalman = KalmanFilter::new(&b);
            analyzer.analyze(&mut track, i * 1000);
        }

        assert!(track.behaviors.contains(BehaviorFlags::LOITERING));
        assert!(track.threat >= 0.3);
    }

    #[test]
    fn running_requires_sustained_speed() {
        let mut analyzer = BehaviorAnalyzer::new(BehaviorAnalyzerConfig::default());
        let mut track = make_track(BoundingBox::new(0.0, 0.0, 0.05, 0.05));
        for i in 0..12u64 {
            let x = (i as f32) * 0.05;
            let b = BoundingBox::new(x.min(0.9), 0.0, 0.05, 0.05);
            track.kalman = KalmanFilter::new(&b);
            analyzer.analyze(&mut track, i * 100);
        }
        assert!(track.behaviors.contains(BehaviorFlags::RUNNING));
    }

    #[test]
    fn garbage_collect_respects_capacity() {
        let mut analyzer = BehaviorAnalyzer::new(BehaviorAnalyzerConfig::default());
        for id in 0..150u32 {
            let mut track = make_track(BoundingBox::new(0.1, 0.1, 0.1, 0.1));
            track.track_id = id;
            analyzer.analyze(&mut track, id as u64 * 10);
        }
        analyzer.garbage_collect(150 * 10, u64::MAX);
        assert!(analyzer.histories.len() <= MAX_HISTORIES);
    }

    #[test]
    fn clear_removes_history() {
        let mut analyzer = BehaviorAnalyzer::new(BehaviorAnalyzerConfig::default());
        let mut track = make_track(BoundingBox::new(0.1, 0.1, 0.1, 0.1));
        analyzer.analyze(&mut track, 0);
        assert!(analyzer.histories.contains_key(&1));
        analyzer.clear(1);
        assert!(!analyzer.histories.contains_key(&1));
    }
}
