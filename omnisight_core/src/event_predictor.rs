//! Maps predicted trajectories and scene context onto a typed,
//! probability-weighted event set (§4.4).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tracker::{BehaviorFlags, ObjectClass};
use crate::trajectory::{detect_collision, detect_zone_entry, Trajectory};

/// Security event categories a timeline can carry (§9 GLOSSARY, mirrors
/// the original `EventType` enum one-to-one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Loitering,
    Theft,
    Assault,
    Vandalism,
    Trespassing,
    SuspiciousBehavior,
    Collision,
    Fall,
    AbandonedObject,
    CrowdFormation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SeverityLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl EventType {
    /// Baseline severity before incident-density/time-of-day escalation
    /// (§4.4 "Severity: function of event type baseline...").
    fn baseline_severity(self) -> SeverityLevel {
        match self {
            EventType::Loitering => SeverityLevel::Low,
            EventType::SuspiciousBehavior => SeverityLevel::Low,
            EventType::Trespassing => SeverityLevel::Medium,
            EventType::Vandalism => SeverityLevel::Medium,
            EventType::AbandonedObject => SeverityLevel::Medium,
            EventType::CrowdFormation => SeverityLevel::Medium,
            EventType::Theft => SeverityLevel::High,
            EventType::Fall => SeverityLevel::High,
            EventType::Assault => SeverityLevel::Critical,
            EventType::Collision => SeverityLevel::Critical,
        }
    }
}

/// A single predicted event, retained only when its composite probability
/// clears `EventPredictorConfig::event_threshold` (§3 `PredictedEvent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedEvent {
    pub event_type: EventType,
    pub t_ms: u64,
    pub probability: f32,
    pub severity: SeverityLevel,
    pub involved_tracks: Vec<u32>,
    pub x: f32,
    pub y: f32,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct ProtectedZone {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub protected_event: EventType,
    pub sensitivity: f32,
}

#[derive(Debug, Clone)]
pub struct IncidentRecord {
    pub event_type: EventType,
    pub timestamp_ms: u64,
    pub x: f32,
    pub y: f32,
}

/// Protected zones, incident history, and time-based risk multipliers fed
/// into the per-type rules (§4.4).
#[derive(Debug, Clone, Default)]
pub struct SceneContext {
    pub zones: Vec<ProtectedZone>,
    pub incident_history: Vec<IncidentRecord>,
    pub time_of_day_risk: f32,
    pub day_of_week_risk: f32,
}

#[derive(Debug, Clone)]
pub struct EventPredictorConfig {
    pub loitering_dwell_threshold_ms: u64,
    pub loitering_radius: f32,
    pub theft_zone_timeout_ms: u64,
    pub assault_distance_threshold: f32,
    pub collision_distance_threshold: f32,
    pub trajectory_weight: f32,
    pub behavior_weight: f32,
    pub context_weight: f32,
    pub history_weight: f32,
    pub event_threshold: f32,
    pub history_radius: f32,
    pub history_window_ms: u64,
}

impl Default for EventPredictorConfig {
    fn default() -> Self {
        Self {
            loitering_dwell_threshold_ms: 30_000,
            loitering_radius: 0.02,
            theft_zone_timeout_ms: 60_000,
            assault_distance_threshold: 0.03,
            collision_distance_threshold: 0.02,
            trajectory_weight: 0.4,
            behavior_weight: 0.3,
            context_weight: 0.2,
            history_weight: 0.1,
            event_threshold: 0.5,
            history_radius: 0.05,
            history_window_ms: 3_600_000,
        }
    }
}

pub struct EventPredictor {
    pub config: EventPredictorConfig,
}

impl EventPredictor {
    pub fn new(config: EventPredictorConfig) -> Self {
        Self { config }
    }

    /// Run every per-type rule over the trajectory set and return the
    /// events that clear `event_threshold` (§4.4 contract).
    pub fn predict(
        &self,
        trajectories: &[Trajectory],
        behaviors: &HashMap<u32, BehaviorFlags>,
        classes: &HashMap<u32, ObjectClass>,
        scene: &SceneContext,
        now_ms: u64,
    ) -> Vec<PredictedEvent> {
        let mut events = Vec::new();

        for trajectory in trajectories {
            let flags = behaviors.get(&trajectory.track_id).copied().unwrap_or(BehaviorFlags::NORMAL);

            if let Some(event) = self.predict_loitering(trajectory, scene, now_ms) {
                events.push(event);
            }
            if let Some(event) = self.predict_theft(trajectory, flags, scene, now_ms) {
                events.push(event);
            }
            if let Some(event) = self.predict_trespassing(trajectory, scene) {
                events.push(event);
            }
        }

        for i in 0..trajectories.len() {
            for j in (i + 1)..trajectories.len() {
                let a = &trajectories[i];
                let b = &trajectories[j];
                let flags_a = behaviors.get(&a.track_id).copied().unwrap_or(BehaviorFlags::NORMAL);
                let flags_b = behaviors.get(&b.track_id).copied().unwrap_or(BehaviorFlags::NORMAL);

                if let Some(event) = self.predict_assault(a, b, flags_a, flags_b, scene, now_ms) {
                    events.push(event);
                }
                if let Some(event) = self.predict_collision(a, b, classes, scene, now_ms) {
                    events.push(event);
                }
            }
        }

        events.retain(|e| e.probability >= self.config.event_threshold);
        events
    }

    fn composite_score(&self, trajectory_conf: f32, behavior_match: f32, zone_proximity: f32, event_type: EventType, scene: &SceneContext, now_ms: u64) -> f32 {
        let incident_density = self.incident_density(event_type, scene, now_ms, None);
        (self.config.trajectory_weight * trajectory_conf
            + self.config.behavior_weight * behavior_match
            + self.config.context_weight * zone_proximity
            + self.config.history_weight * incident_density)
            .clamp(0.0, 1.0)
    }

    fn incident_density(&self, event_type: EventType, scene: &SceneContext, now_ms: u64, near: Option<(f32, f32)>) -> f32 {
        let matching = scene
            .incident_history
            .iter()
            .filter(|rec| {
                rec.event_type == event_type
                    && now_ms.saturating_sub(rec.timestamp_ms) <= self.config.history_window_ms
                    && near.map_or(true, |(x, y)| {
                        let dx = rec.x - x;
                        let dy = rec.y - y;
                        (dx * dx + dy * dy).sqrt() <= self.config.history_radius
                    })
            })
            .count();
        (matching as f32 / 5.0).min(1.0)
    }

    /// Longest sub-interval of `trajectory` whose samples all lie within
    /// `radius` of their centroid, used by loitering dwell prediction.
    fn longest_dwell_ms(&self, trajectory: &Trajectory, radius: f32) -> u64 {
        let states = &trajectory.states;
        let mut best = 0u64;
        for start in 0..states.len() {
            let mut end = start;
            for candidate in (start + 1)..states.len() {
                let within = states[start..=candidate].iter().all(|s| {
                    let dx = s.x - states[start].x;
                    let dy = s.y - states[start].y;
                    (dx * dx + dy * dy).sqrt() <= radius
                });
                if within {
                    end = candidate;
                } else {
                    break;
                }
            }
            let span = states[end].t_ms.saturating_sub(states[start].t_ms);
            if span > best {
                best = span;
            }
        }
        best
    }

    fn predict_loitering(&self, trajectory: &Trajectory, scene: &SceneContext, now_ms: u64) -> Option<PredictedEvent> {
        let dwell_ms = self.longest_dwell_ms(trajectory, self.config.loitering_radius);
        if trajectory.overall_confidence < 0.3 || dwell_ms < self.config.loitering_dwell_threshold_ms {
            return None;
        }
        let state = trajectory.states.last()?;
        let probability = self.composite_score(trajectory.overall_confidence, 1.0, 0.0, EventType::Loitering, scene, now_ms);
        Some(PredictedEvent {
            event_type: EventType::Loitering,
            t_ms: state.t_ms,
            probability,
            severity: SeverityLevel::None,
            involved_tracks: vec![trajectory.track_id],
            x: state.x,
            y: state.y,
            description: format!("track {} predicted to loiter for {}ms", trajectory.track_id, dwell_ms),
        })
    }

    fn predict_theft(&self, trajectory: &Trajectory, flags: BehaviorFlags, scene: &SceneContext, now_ms: u64) -> Option<PredictedEvent> {
        let zone = scene
            .zones
            .iter()
            .find(|z| z.protected_event == EventType::Theft)?;
        let (entry_idx, entry_conf) = detect_zone_entry(trajectory, zone.x, zone.y, zone.radius)?;

        let suspicious = flags.contains(BehaviorFlags::CONCEALING) || flags.contains(BehaviorFlags::SUSPICIOUS_MOVEMENT);
        if !suspicious {
            return None;
        }

        let entry_t = trajectory.states[entry_idx].t_ms;
        let exit = trajectory.states[entry_idx..]
            .iter()
            .find(|s| (s.t_ms.saturating_sub(entry_t)) <= self.config.theft_zone_timeout_ms
                && {
                    let dx = s.x - zone.x;
                    let dy = s.y - zone.y;
                    (dx * dx + dy * dy).sqrt() > zone.radius
                });
        let exit = exit?;

        let probability = self.composite_score(entry_conf, 1.0, zone.sensitivity, EventType::Theft, scene, now_ms);
        Some(PredictedEvent {
            event_type: EventType::Theft,
            t_ms: exit.t_ms,
            probability,
            severity: SeverityLevel::None,
            involved_tracks: vec![trajectory.track_id],
            x: exit.x,
            y: exit.y,
            description: format!("track {} predicted rapid exit from protected zone", trajectory.track_id),
        })
    }

    fn predict_assault(
        &self,
        a: &Trajectory,
        b: &Trajectory,
        flags_a: BehaviorFlags,
        flags_b: BehaviorFlags,
        scene: &SceneContext,
        now_ms: u64,
    ) -> Option<PredictedEvent> {
        let (idx, conf) = detect_collision(a, b, self.config.assault_distance_threshold)?;
        if !flags_a.contains(BehaviorFlags::RUNNING) && !flags_b.contains(BehaviorFlags::RUNNING) {
            return None;
        }
        let sa = a.states[idx];
        let probability = self.composite_score(conf, 1.0, 0.0, EventType::Assault, scene, now_ms);
        Some(PredictedEvent {
            event_type: EventType::Assault,
            t_ms: sa.t_ms,
            probability,
            severity: SeverityLevel::None,
            involved_tracks: vec![a.track_id, b.track_id],
            x: sa.x,
            y: sa.y,
            description: format!("tracks {} and {} converging at speed", a.track_id, b.track_id),
        })
    }

    fn predict_collision(
        &self,
        a: &Trajectory,
        b: &Trajectory,
        classes: &HashMap<u32, ObjectClass>,
        scene: &SceneContext,
        now_ms: u64,
    ) -> Option<PredictedEvent> {
        let class_a = classes.get(&a.track_id).copied().unwrap_or(ObjectClass::Unknown);
        let class_b = classes.get(&b.track_id).copied().unwrap_or(ObjectClass::Unknown);
        let relevant = |c: ObjectClass| matches!(c, ObjectClass::Vehicle | ObjectClass::Person);
        if !relevant(class_a) || !relevant(class_b) {
            return None;
        }
        let (idx, conf) = detect_collision(a, b, self.config.collision_distance_threshold)?;
        let sa = a.states[idx];
        let probability = self.composite_score(conf, 1.0, 0.0, EventType::Collision, scene, now_ms);
        Some(PredictedEvent {
            event_type: EventType::Collision,
            t_ms: sa.t_ms,
            probability,
            severity: SeverityLevel::None,
            involved_tracks: vec![a.track_id, b.track_id],
            x: sa.x,
            y: sa.y,
            description: format!("tracks {} and {} predicted to collide", a.track_id, b.track_id),
        })
    }

    fn predict_trespassing(&self, trajectory: &Trajectory, scene: &SceneContext) -> Option<PredictedEvent> {
        for zone in scene.zones.iter().filter(|z| z.protected_event == EventType::Trespassing) {
            if let Some((idx, conf)) = detect_zone_entry(trajectory, zone.x, zone.y, zone.radius) {
                let state = trajectory.states[idx];
                let probability = (self.config.trajectory_weight * conf + self.config.context_weight * zone.sensitivity).clamp(0.0, 1.0);
                return Some(PredictedEvent {
                    event_type: EventType::Trespassing,
                    t_ms: state.t_ms,
                    probability,
                    severity: SeverityLevel::None,
                    involved_tracks: vec![trajectory.track_id],
                    x: state.x,
                    y: state.y,
                    description: format!("track {} predicted to enter restricted zone", trajectory.track_id),
                });
            }
        }
        None
    }

    /// Escalate an event type's baseline severity by recent incident
    /// density near the event location and the scene's time-of-day
    /// multiplier (§4.4 "Severity").
    pub fn calculate_severity(&self, event: &PredictedEvent, scene: &SceneContext, now_ms: u64) -> SeverityLevel {
        let baseline = event.event_type.baseline_severity();
        let density = self.incident_density(event.event_type, scene, now_ms, Some((event.x, event.y)));
        let multiplier = 1.0 + density + scene.time_of_day_risk.max(0.0) * 0.25 + scene.day_of_week_risk.max(0.0) * 0.1;

        let rank = match baseline {
            SeverityLevel::None => 0,
            SeverityLevel::Low => 1,
            SeverityLevel::Medium => 2,
            SeverityLevel::High => 3,
            SeverityLevel::Critical => 4,
        };
        let escalated = ((rank as f32 * multiplier).round() as i32).clamp(0, 4);
        match escalated {
            0 => SeverityLevel::None,
            1 => SeverityLevel::Low,
            2 => SeverityLevel::Medium,
            3 => SeverityLevel::High,
            _ => SeverityLevel::Critical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BoundingBox;
    use crate::kalman::KalmanFilter;
    use crate::tracker::Track;
    use crate::trajectory::{TrajectoryConfig, TrajectoryPredictor};

    fn stationary_track(id: u32, x: f32, y: f32) -> Track {
        let bbox = BoundingBox::new(x, y, 0.02, 0.02);
        Track {
            track_id: id,
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
    fn loitering_event_requires_dwell_and_confidence() {
        let mut config = TrajectoryConfig::default();
        config.horizon_ms = 35_000;
        config.step_ms = 1000;
        config.uncertainty_growth = 0.0;
        let predictor = TrajectoryPredictor::new(config);
        let track = stationary_track(1, 0.5, 0.5);
        let trajectory = predictor.predict(&track, 0);

        let event_predictor = EventPredictor::new(EventPredictorConfig::default());
        let behaviors = HashMap::new();
        let classes = HashMap::new();
        let scene = SceneContext::default();
        let events = event_predictor.predict(&[trajectory], &behaviors, &classes, &scene, 0);
        assert!(events.iter().any(|e| e.event_type == EventType::Loitering));
    }

    #[test]
    fn collision_requires_relevant_classes() {
        let mut config = TrajectoryConfig::default();
        config.horizon_ms = 5000;
        config.step_ms = 1000;
        let predictor = TrajectoryPredictor::new(config);

        let mut a = stationary_track(1, 0.40, 0.40);
        a.kalman.state[4] = 0.02;
        let mut b = stationary_track(2, 0.44, 0.40);
        b.kalman.state[4] = -0.02;
        b.class = ObjectClass::Face;

        let traj_a = predictor.predict(&a, 0);
        let traj_b = predictor.predict(&b, 0);

        let event_predictor = EventPredictor::new(EventPredictorConfig::default());
        let behaviors = HashMap::new();
        let mut classes = HashMap::new();
        classes.insert(1, ObjectClass::Person);
        classes.insert(2, ObjectClass::Face);
        let scene = SceneContext::default();
        let events = event_predictor.predict(&[traj_a, traj_b], &behaviors, &classes, &scene, 0);
        assert!(!events.iter().any(|e| e.event_type == EventType::Collision));
    }

    #[test]
    fn severity_escalates_with_incident_density() {
        let predictor = EventPredictor::new(EventPredictorConfig::default());
        let event = PredictedEvent {
            event_type: EventType::Theft,
            t_ms: 1000,
            probability: 0.9,
            severity: SeverityLevel::None,
            involved_tracks: vec![1],
            x: 0.5,
            y: 0.5,
            description: String::new(),
        };
        let empty_scene = SceneContext::default();
        let base = predictor.calculate_severity(&event, &empty_scene, 1000);

        let busy_scene = SceneContext {
            incident_history: (0..10)
                .map(|i| IncidentRecord { event_type: EventType::Theft, timestamp_ms: i * 10, x: 0.5, y: 0.5 })
                .collect(),
            ..Default::default()
        };
        let escalated = predictor.calculate_severity(&event, &busy_scene, 1000);
        assert!(escalated >= base);
    }
}
