//! Error taxonomy for the perception/timeline/IPC pipeline.
//!
//! Every fallible operation in this crate folds into one of the kinds
//! below rather than panicking; `src/bin/main.rs` maps each kind onto the
//! pipeline's recoverable-error counters instead of aborting the producer
//! loop.

use thiserror::Error;

/// Errors raised while validating or associating a frame of detections.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("detection bounding box out of range: {0:?}")]
    InvalidDetection(crate::geometry::BoundingBox),
    #[error("frame contains {0} detections, exceeding the configured capacity {1}")]
    CapacityExceeded(usize, usize),
    #[error("kalman filter state went non-finite for track {0}")]
    NonFiniteState(u32),
}

/// Errors raised by the timeline engine's merge/prune/intervention search.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("branch probabilities for node {0} do not sum to 1 (got {1})")]
    UnnormalizedBranch(usize, f64),
    #[error("timeline {0} not found in arena")]
    UnknownTimeline(u32),
    #[error("node arena exhausted at capacity {0}")]
    ArenaExhausted(usize),
}

/// Errors raised by the shared-memory / command-channel IPC layer.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("payload count {0} exceeds region capacity {1}")]
    PayloadTooLarge(usize, usize),
    #[error("shared memory region {0} unavailable: {1}")]
    RegionUnavailable(&'static str, std::io::Error),
    #[error("command frame malformed: {0}")]
    MalformedCommand(String),
    #[error("status/stats write failed: {0}")]
    WriteFailed(#[from] std::io::Error),
    #[error("crc mismatch reading frame: expected {expected:08x}, got {actual:08x}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("frame header invalid: {0}")]
    BadHeader(String),
}

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The top-level error kind that the producer loop and command thread
/// classify every failure into (§7 of the design). This does not replace
/// the per-module errors above — `From` impls fold them in — it is the
/// shape the recoverable-error counters key on.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InputInvalid(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("ipc publish failed but is retryable: {0}")]
    IpcPublishTransient(#[source] IpcError),
    #[error("ipc publish failed fatally: {0}")]
    IpcFatal(#[source] IpcError),
    #[error("malformed command: {0}")]
    CommandMalformed(String),
    #[error("shutdown requested")]
    ShutdownRequested,
}

impl From<TrackingError> for PipelineError {
    fn from(e: TrackingError) -> Self {
        match e {
            TrackingError::InvalidDetection(_) => PipelineError::InputInvalid(e.to_string()),
            TrackingError::CapacityExceeded(..) => PipelineError::ResourceExhausted(e.to_string()),
            TrackingError::NonFiniteState(_) => PipelineError::ResourceExhausted(e.to_string()),
        }
    }
}

impl From<TimelineError> for PipelineError {
    fn from(e: TimelineError) -> Self {
        PipelineError::ResourceExhausted(e.to_string())
    }
}
