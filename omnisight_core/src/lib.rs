//! OmniSight core perception pipeline: detection-to-track association,
//! behavioral threat scoring, branching trajectory/timeline prediction,
//! and the shared-memory/command-pipe IPC boundary that hands the
//! result to an external API process (§1-§2).
//!
//! The swarm (camera-to-camera) transport and the inference runtime that
//! produces `Detection`s are both out of scope for this crate; `swarm`
//! and `tracker::Detection` only define the seams those collaborators
//! plug into.

pub mod behavior;
pub mod config;
pub mod error;
pub mod event_predictor;
pub mod geometry;
pub mod ipc;
pub mod kalman;
pub mod stats;
pub mod swarm;
pub mod timeline;
pub mod tracker;
pub mod trajectory;

pub use behavior::{BehaviorAnalyzer, BehaviorAnalyzerConfig};
pub use config::Config;
pub use error::{ConfigError, IpcError, PipelineError, TimelineError, TrackingError};
pub use event_predictor::{EventPredictor, EventPredictorConfig, EventType, PredictedEvent, SceneContext, SeverityLevel};
pub use geometry::BoundingBox;
pub use ipc::IpcPublisher;
pub use kalman::KalmanFilter;
pub use stats::{PipelineStats, SharedStats};
pub use swarm::{NullSwarm, SwarmSink, SwarmSource};
pub use timeline::{Timeline, TimelineConfig, TimelineEngine};
pub use tracker::{BehaviorFlags, Detection, ObjectClass, Track, Tracker, TrackerConfig};
pub use trajectory::{Trajectory, TrajectoryConfig, TrajectoryPredictor};
