//! Process-wide configuration block (§6 "Environment"). Immutable except
//! via `CONFIG_UPDATE` commands, which are applied at the top of the next
//! producer tick rather than mutating state mid-frame.

use serde::{Deserialize, Serialize};

use crate::behavior::BehaviorAnalyzerConfig;
use crate::error::ConfigError;
use crate::event_predictor::EventPredictorConfig;
use crate::timeline::TimelineConfig;
use crate::tracker::TrackerConfig;
use crate::trajectory::TrajectoryConfig;

/// Shared-memory region and command-channel names (§6). Preserved
/// bit-exactly from the original IPC contract (DESIGN.md Open Question
/// 4) since external readers key on these strings.
pub mod ipc_names {
    pub const SHM_DETECTIONS: &str = "/omnisight_detections";
    pub const SHM_TRACKS: &str = "/omnisight_tracks";
    pub const SHM_TIMELINES: &str = "/omnisight_timelines";

    pub const READY_DETECTIONS: &str = "/omnisight_frame_ready";
    pub const READY_TRACKS: &str = "/omnisight_tracks_ready";
    pub const READY_TIMELINES: &str = "/omnisight_timelines_ready";

    pub const PIPE_CMD: &str = "/tmp/omnisight_cmd";
    pub const PIPE_ACK: &str = "/tmp/omnisight_cmd_ack";

    pub const JSON_STATS: &str = "/tmp/omnisight_stats.json";
    pub const JSON_STATUS: &str = "/tmp/omnisight_status.json";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcConfig {
    pub shm_detections: String,
    pub shm_tracks: String,
    pub shm_timelines: String,
    pub pipe_cmd: String,
    pub pipe_ack: String,
    pub json_stats: String,
    pub json_status: String,
    pub stats_update_interval_ms: u64,
    pub command_timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            shm_detections: ipc_names::SHM_DETECTIONS.to_string(),
            shm_tracks: ipc_names::SHM_TRACKS.to_string(),
            shm_timelines: ipc_names::SHM_TIMELINES.to_string(),
            pipe_cmd: ipc_names::PIPE_CMD.to_string(),
            pipe_ack: ipc_names::PIPE_ACK.to_string(),
            json_stats: ipc_names::JSON_STATS.to_string(),
            json_status: ipc_names::JSON_STATUS.to_string(),
            stats_update_interval_ms: 1_000,
            command_timeout_ms: 1_000,
        }
    }
}

/// The complete, process-wide configuration for one camera's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfigToml,
    #[serde(default)]
    pub behavior: BehaviorConfigToml,
    #[serde(default)]
    pub trajectory: TrajectoryConfigToml,
    #[serde(default)]
    pub event_predictor: EventPredictorConfigToml,
    #[serde(default)]
    pub timeline: TimelineConfigToml,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub frame_period_ms: FramePeriod,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::from)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_string(), e))?;
        Self::from_toml_str(&text)
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        let mut tracker: TrackerConfig = self.tracker.clone().into();
        tracker.frame_period_ms = self.frame_period_ms.0;
        tracker
    }

    pub fn behavior_config(&self) -> BehaviorAnalyzerConfig {
        self.behavior.clone().into()
    }

    pub fn trajectory_config(&self) -> TrajectoryConfig {
        self.trajectory.clone().into()
    }

    pub fn event_predictor_config(&self) -> EventPredictorConfig {
        self.event_predictor.clone().into()
    }

    pub fn timeline_config(&self) -> TimelineConfig {
        self.timeline.clone().into()
    }
}

/// `serde`-friendly mirror of `TrackerConfig`; the module-native config
/// structs stay free of derive noise, this one carries the TOML schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfigToml {
    pub iou_threshold: f32,
    pub min_hits: u32,
    pub max_age: u32,
    pub max_tracks: usize,
    pub feature_similarity_weight: f32,
}

impl Default for TrackerConfigToml {
    fn default() -> Self {
        let d = TrackerConfig::default();
        Self {
            iou_threshold: d.iou_threshold,
            min_hits: d.min_hits,
            max_age: d.max_age,
            max_tracks: d.max_tracks,
            feature_similarity_weight: d.feature_similarity_weight,
        }
    }
}

impl From<TrackerConfigToml> for TrackerConfig {
    fn from(t: TrackerConfigToml) -> Self {
        TrackerConfig {
            iou_threshold: t.iou_threshold,
            min_hits: t.min_hits,
            max_age: t.max_age,
            max_tracks: t.max_tracks,
            feature_similarity_weight: t.feature_similarity_weight,
            frame_period_ms: TrackerConfig::default().frame_period_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfigToml {
    pub loitering_dwell_time_ms: u64,
    pub loitering_radius_meters: f32,
    pub loitering_velocity_threshold: f32,
    pub running_velocity_threshold: f32,
    pub running_duration_ms: u64,
    pub zigzag_threshold_degrees: f32,
    pub zigzag_count_threshold: u32,
    pub meters_per_normalized_unit: f32,
}

impl Default for BehaviorConfigToml {
    fn default() -> Self {
        let d = BehaviorAnalyzerConfig::default();
        Self {
            loitering_dwell_time_ms: d.loitering_dwell_time_ms,
            loitering_radius_meters: d.loitering_radius_meters,
            loitering_velocity_threshold: d.loitering_velocity_threshold,
            running_velocity_threshold: d.running_velocity_threshold,
            running_duration_ms: d.running_duration_ms,
            zigzag_threshold_degrees: d.zigzag_threshold_degrees,
            zigzag_count_threshold: d.zigzag_count_threshold,
            meters_per_normalized_unit: d.meters_per_normalized_unit,
        }
    }
}

impl From<BehaviorConfigToml> for BehaviorAnalyzerConfig {
    fn from(b: BehaviorConfigToml) -> Self {
        let defaults = BehaviorAnalyzerConfig::default();
        BehaviorAnalyzerConfig {
            loitering_dwell_time_ms: b.loitering_dwell_time_ms,
            loitering_radius_meters: b.loitering_radius_meters,
            loitering_velocity_threshold: b.loitering_velocity_threshold,
            running_velocity_threshold: b.running_velocity_threshold,
            running_duration_ms: b.running_duration_ms,
            zigzag_threshold_degrees: b.zigzag_threshold_degrees,
            zigzag_count_threshold: b.zigzag_count_threshold,
            meters_per_normalized_unit: b.meters_per_normalized_unit,
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryConfigToml {
    pub horizon_ms: u64,
    pub step_ms: u64,
    pub uncertainty_growth: f32,
    pub consider_boundaries: bool,
}

impl Default for TrajectoryConfigToml {
    fn default() -> Self {
        let d = TrajectoryConfig::default();
        Self {
            horizon_ms: d.horizon_ms,
            step_ms: d.step_ms,
            uncertainty_growth: d.uncertainty_growth,
            consider_boundaries: d.consider_boundaries,
        }
    }
}

impl From<TrajectoryConfigToml> for TrajectoryConfig {
    fn from(t: TrajectoryConfigToml) -> Self {
        let defaults = TrajectoryConfig::default();
        TrajectoryConfig {
            horizon_ms: t.horizon_ms,
            step_ms: t.step_ms,
            uncertainty_growth: t.uncertainty_growth,
            consider_boundaries: t.consider_boundaries,
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPredictorConfigToml {
    pub event_threshold: f32,
    pub trajectory_weight: f32,
    pub behavior_weight: f32,
    pub context_weight: f32,
    pub history_weight: f32,
}

impl Default for EventPredictorConfigToml {
    fn default() -> Self {
        let d = EventPredictorConfig::default();
        Self {
            event_threshold: d.event_threshold,
            trajectory_weight: d.trajectory_weight,
            behavior_weight: d.behavior_weight,
            context_weight: d.context_weight,
            history_weight: d.history_weight,
        }
    }
}

impl From<EventPredictorConfigToml> for EventPredictorConfig {
    fn from(e: EventPredictorConfigToml) -> Self {
        let defaults = EventPredictorConfig::default();
        EventPredictorConfig {
            event_threshold: e.event_threshold,
            trajectory_weight: e.trajectory_weight,
            behavior_weight: e.behavior_weight,
            context_weight: e.context_weight,
            history_weight: e.history_weight,
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfigToml {
    pub prediction_horizon_ms: u64,
    pub time_step_ms: u64,
    pub max_timelines: usize,
    pub branch_threshold: f32,
    pub merge_threshold: f32,
    pub enable_intervention_search: bool,
}

impl Default for TimelineConfigToml {
    fn default() -> Self {
        let d = TimelineConfig::default();
        Self {
            prediction_horizon_ms: d.prediction_horizon_ms,
            time_step_ms: d.time_step_ms,
            max_timelines: d.max_timelines,
            branch_threshold: d.branch_threshold,
            merge_threshold: d.merge_threshold,
            enable_intervention_search: d.enable_intervention_search,
        }
    }
}

impl From<TimelineConfigToml> for TimelineConfig {
    fn from(t: TimelineConfigToml) -> Self {
        let defaults = TimelineConfig::default();
        TimelineConfig {
            prediction_horizon_ms: t.prediction_horizon_ms,
            time_step_ms: t.time_step_ms,
            max_timelines: t.max_timelines,
            branch_threshold: t.branch_threshold,
            merge_threshold: t.merge_threshold,
            enable_intervention_search: t.enable_intervention_search,
            ..defaults
        }
    }
}

/// Newtype so `Config` can derive `Default` while documenting the field's
/// unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FramePeriod(pub u64);

impl Default for FramePeriod {
    fn default() -> Self {
        FramePeriod(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml_str(&text).unwrap();
        assert_eq!(parsed.tracker.min_hits, config.tracker.min_hits);
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let text = "[tracker]\nmin_hits = 5\n";
        let err = Config::from_toml_str(text);
        assert!(err.is_err(), "tracker requires all fields without per-field defaults");
    }
}
