//! Producer-loop host binary (§5 "Scheduling model"): owns the
//! single-threaded tracker -> behavior -> timeline -> IPC tick, a
//! command-listener thread polling the command channel with a short
//! timeout, and the periodic status/stats writers. This is the minimal
//! host needed to exercise the core pipeline end-to-end; it is not the
//! HTTP/REST facade or the inference runtime, both of which stay out of
//! scope (§1).

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use omnisight_core::config::Config;
use omnisight_core::ipc::command::{self, Command, CommandAck, CommandType};
use omnisight_core::ipc::frame::{DetectionRecord, InterventionPointRecord, PredictedEventRecord, TimelineSnapshotRecord, TrackRecord};
use omnisight_core::ipc::status::{ProcessStatus, StatusSnapshot};
use omnisight_core::ipc::IpcPublisher;
use omnisight_core::swarm::{NullSwarm, SwarmSink, SwarmSource};
use omnisight_core::{BehaviorAnalyzer, BoundingBox, Detection, ObjectClass, SceneContext, SharedStats, Timeline, TimelineEngine, Tracker};

#[derive(Parser, Debug)]
#[command(name = "omnisight-core", about = "On-camera precognitive security pipeline producer loop", long_about = None)]
struct Cli {
    /// TOML config file overlaying the module defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Newline-delimited JSON file of per-frame detection arrays, consumed
    /// one line per tick. With no input, the loop idles on empty frames
    /// (every existing track simply ages out) so the rest of the pipeline
    /// still runs end-to-end.
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Stop after this many ticks instead of running until SHUTDOWN.
    #[arg(long)]
    frames: Option<u64>,

    /// Log verbosity, forwarded to `tracing-subscriber`'s env filter.
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Deserialize)]
struct InputDetection {
    id: u32,
    class: InputClass,
    confidence: f32,
    bbox: [f32; 4],
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum InputClass {
    Unknown,
    Person,
    Vehicle,
    Face,
    Package,
    Animal,
}

impl From<InputClass> for ObjectClass {
    fn from(c: InputClass) -> Self {
        match c {
            InputClass::Unknown => ObjectClass::Unknown,
            InputClass::Person => ObjectClass::Person,
            InputClass::Vehicle => ObjectClass::Vehicle,
            InputClass::Face => ObjectClass::Face,
            InputClass::Package => ObjectClass::Package,
            InputClass::Animal => ObjectClass::Animal,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Messages the command-listener thread enqueues for the producer loop to
/// drain at the top of its tick (§9 "Concurrency model substitution").
enum ControlMessage {
    ConfigUpdate(Config),
    RefreshTimelines,
    SyncSwarm,
    Shutdown,
}

/// Blocking-with-timeout command channel (§5 "Suspension points": "the
/// command listener's read (blocking, with timeout <= 100ms)"). No FIFO
/// crate is depended on: the channel is modeled as a plain file the
/// listener polls every tick, matching `command.rs`'s own description of
/// the transport as "a real FIFO, a plain file, or an in-memory buffer".
fn run_command_listener(
    cmd_path: PathBuf,
    ack_path: PathBuf,
    running: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    control_tx: SyncSender<ControlMessage>,
) {
    const POLL_INTERVAL: Duration = Duration::from_millis(100);

    while running.load(Ordering::Acquire) {
        match std::fs::read_to_string(&cmd_path) {
            Ok(contents) if !contents.trim().is_empty() => {
                std::fs::write(&cmd_path, "").ok();
                let mut acks = String::new();
                for line in contents.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let ack = handle_command_line(line, &stats, &control_tx);
                    acks.push_str(&command::encode_ack(&ack));
                }
                if let Err(e) = append_acks(&ack_path, &acks) {
                    warn!(error = %e, "failed to append command acks");
                }
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to read command channel"),
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn append_acks(path: &PathBuf, acks: &str) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(acks.as_bytes())
}

fn handle_command_line(line: &str, stats: &SharedStats, control_tx: &SyncSender<ControlMessage>) -> CommandAck {
    let ts = now_ms();
    let parsed = match command::parse_command(line) {
        Ok(c) => c,
        Err(e) => {
            stats.update(|s| s.commands_malformed += 1);
            return CommandAck::error("unknown", ts, e.to_string());
        }
    };
    stats.update(|s| s.commands_processed += 1);
    dispatch_command(parsed, ts, control_tx)
}

fn dispatch_command(cmd: Command, ts: u64, control_tx: &SyncSender<ControlMessage>) -> CommandAck {
    match cmd.command_type {
        CommandType::Ping => CommandAck::ok(cmd.request_id, ts, "pong"),
        CommandType::ConfigUpdate => match serde_json::from_value::<Config>(cmd.data) {
            Ok(config) => {
                if control_tx.try_send(ControlMessage::ConfigUpdate(config)).is_ok() {
                    CommandAck::ok(cmd.request_id, ts, "config update queued for next tick")
                } else {
                    CommandAck::error(cmd.request_id, ts, "control channel full")
                }
            }
            Err(e) => CommandAck::error(cmd.request_id, ts, format!("invalid config payload: {e}")),
        },
        CommandType::RefreshTimelines => {
            let _ = control_tx.try_send(ControlMessage::RefreshTimelines);
            CommandAck::ok(cmd.request_id, ts, "timeline refresh queued")
        }
        CommandType::SyncSwarm => {
            let _ = control_tx.try_send(ControlMessage::SyncSwarm);
            CommandAck::ok(cmd.request_id, ts, "swarm sync queued")
        }
        CommandType::Shutdown => {
            let _ = control_tx.try_send(ControlMessage::Shutdown);
            CommandAck::ok(cmd.request_id, ts, "shutting down")
        }
        CommandType::Unknown => CommandAck::error(cmd.request_id, ts, "unknown command type"),
    }
}

fn load_detections_for_tick(lines: &mut Option<std::io::Lines<std::io::BufReader<std::fs::File>>>, tick_ms: u64) -> Vec<Detection> {
    let Some(lines) = lines else { return Vec::new() };
    let line = match lines.next() {
        Some(Ok(line)) => line,
        Some(Err(e)) => {
            warn!(error = %e, "failed to read next detections line, treating frame as empty");
            return Vec::new();
        }
        None => return Vec::new(),
    };
    if line.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<InputDetection>>(&line) {
        Ok(inputs) => inputs
            .into_iter()
            .map(|d| Detection {
                id: d.id,
                class: d.class.into(),
                confidence: d.confidence,
                bbox: BoundingBox::new(d.bbox[0], d.bbox[1], d.bbox[2], d.bbox[3]),
                timestamp_ms: tick_ms,
                features: [0.0; 128],
            })
            .collect(),
        Err(e) => {
            warn!(error = %e, "malformed detection line, treating frame as empty");
            Vec::new()
        }
    }
}

fn track_to_record(track: &omnisight_core::Track) -> TrackRecord {
    let current = track.predicted_bbox();
    let (vx, vy) = track.velocity();
    TrackRecord {
        track_id: track.track_id,
        class: track.class as u32,
        current_bbox: [current.x, current.y, current.width, current.height],
        predicted_bbox: [current.x, current.y, current.width, current.height],
        velocity_x: vx as f32,
        velocity_y: vy as f32,
        confidence: track.confidence,
        frame_count: track.hits,
        miss_count: track.since_update,
        behaviors: track.behaviors.bits() as u32,
        threat_score: track.threat,
        first_seen_ms: track.first_seen_ms,
        last_seen_ms: track.last_seen_ms,
    }
}

fn timeline_to_record(timeline: &Timeline) -> TimelineSnapshotRecord {
    TimelineSnapshotRecord {
        timeline_id: timeline.timeline_id,
        overall_probability: timeline.overall_probability,
        prediction_start_ms: timeline.prediction_start_ms,
        prediction_end_ms: timeline.prediction_end_ms,
        events: timeline.events.iter().map(event_to_record).collect(),
        interventions: timeline
            .interventions
            .iter()
            .map(|i| InterventionPointRecord {
                timestamp_ms: i.t_ms,
                intervention_type: i.intervention_type as u32,
                effectiveness: i.effectiveness,
                cost: i.cost,
                prevented_event: event_to_record(&i.prevented_event),
                recommendation: i.recommendation.clone(),
            })
            .collect(),
        worst_case_severity: timeline.worst_case_severity as u32,
        total_threat_score: timeline.integrated_threat,
    }
}

fn event_to_record(event: &omnisight_core::event_predictor::PredictedEvent) -> PredictedEventRecord {
    let mut involved = [0u32; 4];
    let num_involved = event.involved_tracks.len().min(4);
    involved[..num_involved].copy_from_slice(&event.involved_tracks[..num_involved]);
    PredictedEventRecord {
        event_type: event.event_type as u32,
        timestamp_ms: event.t_ms,
        probability: event.probability,
        severity: event.severity as u32,
        involved_tracks: involved,
        num_involved: num_involved as u32,
        location_x: event.x,
        location_y: event.y,
        description: event.description.clone(),
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path.to_str().unwrap_or_default()) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "failed to load config, exiting");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let mut detection_lines = cli.detections.as_ref().map(|p| {
        let file = std::fs::File::open(p).unwrap_or_else(|e| {
            error!(error = %e, path = %p.display(), "failed to open detections file, exiting");
            std::process::exit(1);
        });
        std::io::BufRead::lines(std::io::BufReader::new(file))
    });

    let started_at_ms = now_ms();
    let running = Arc::new(AtomicBool::new(true));
    let stats = Arc::new(SharedStats::new());
    let (control_tx, control_rx): (SyncSender<ControlMessage>, Receiver<ControlMessage>) = sync_channel(16);

    let listener_handle = {
        let cmd_path = PathBuf::from(&config.ipc.pipe_cmd);
        let ack_path = PathBuf::from(&config.ipc.pipe_ack);
        let running = running.clone();
        let stats = stats.clone();
        let control_tx = control_tx.clone();
        std::thread::spawn(move || run_command_listener(cmd_path, ack_path, running, stats, control_tx))
    };

    let mut tracker = Tracker::new(config.tracker_config());
    let mut behavior = BehaviorAnalyzer::new(config.behavior_config());
    let mut timeline_engine = TimelineEngine::new(config.timeline_config(), config.event_predictor_config());
    let publisher = IpcPublisher::new();
    let scene = SceneContext::default();
    let mut swarm_sink: Box<dyn SwarmSink> = Box::new(NullSwarm);
    let mut swarm_source: Box<dyn SwarmSource> = Box::new(NullSwarm);

    write_status(&config, &StatusSnapshot::new(ProcessStatus::Starting, now_ms(), started_at_ms));
    info!(?cli, "producer loop starting");

    let frame_period = Duration::from_millis(config.frame_period_ms.0);
    let mut tick: u64 = 0;
    let mut last_stats_write_ms = now_ms();

    write_status(&config, &StatusSnapshot::new(ProcessStatus::Running, now_ms(), started_at_ms));

    while running.load(Ordering::Acquire) {
        if let Some(limit) = cli.frames {
            if tick >= limit {
                break;
            }
        }

        loop {
            match control_rx.try_recv() {
                Ok(ControlMessage::ConfigUpdate(new_config)) => {
                    info!("applying queued config update");
                    tracker.config = new_config.tracker_config();
                    behavior = BehaviorAnalyzer::new(new_config.behavior_config());
                    timeline_engine = TimelineEngine::new(new_config.timeline_config(), new_config.event_predictor_config());
                    config = new_config;
                }
                Ok(ControlMessage::RefreshTimelines) => {
                    info!("forcing timeline engine rebuild");
                    timeline_engine = TimelineEngine::new(config.timeline_config(), config.event_predictor_config());
                }
                Ok(ControlMessage::SyncSwarm) => {
                    debug!("forcing swarm poll");
                    drain_swarm(swarm_source.as_mut());
                }
                Ok(ControlMessage::Shutdown) => {
                    info!("shutdown command received");
                    running.store(false, Ordering::Release);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        if !running.load(Ordering::Acquire) {
            break;
        }

        let t_ms = now_ms();
        let detections = load_detections_for_tick(&mut detection_lines, t_ms);

        let detection_records: Vec<DetectionRecord> = detections
            .iter()
            .map(|d| DetectionRecord { id: d.id, class: d.class as u32, confidence: d.confidence, bbox: [d.bbox.x, d.bbox.y, d.bbox.width, d.bbox.height], timestamp_ms: d.timestamp_ms })
            .collect();
        if let Err(e) = publisher.publish_detections(t_ms, &detection_records) {
            warn!(error = %e, "detection publish failed");
            stats.update(|s| s.ipc_transient_errors += 1);
        }

        match tracker.update(&detections, t_ms) {
            Ok(_confirmed) => {}
            Err(e) => {
                warn!(error = %e, "tracker update failed");
                stats.update(|s| s.input_invalid_count += 1);
            }
        }

        for track in tracker.tracks_mut() {
            behavior.analyze(track, t_ms);
        }
        behavior.garbage_collect(t_ms, config.timeline_config().prediction_horizon_ms);

        let track_records: Vec<TrackRecord> = tracker.tracks().iter().map(track_to_record).collect();
        if let Err(e) = publisher.publish_tracks(t_ms, &track_records) {
            warn!(error = %e, "track publish failed");
            stats.update(|s| s.ipc_transient_errors += 1);
        }

        match timeline_engine.update(tracker.tracks(), &scene, t_ms) {
            Ok(timelines) => {
                let timeline_records: Vec<TimelineSnapshotRecord> = timelines.iter().map(timeline_to_record).collect();
                if let Err(e) = publisher.publish_timelines(t_ms, &timeline_records) {
                    warn!(error = %e, "timeline publish failed");
                    stats.update(|s| s.ipc_transient_errors += 1);
                }
                stats.update(|s| {
                    s.active_timelines = timeline_records.len() as u32;
                    s.events_predicted += timeline_records.iter().map(|t| t.events.len() as u64).sum::<u64>();
                    s.interventions_suggested += timeline_records.iter().map(|t| t.interventions.len() as u64).sum::<u64>();
                });

                for track in tracker.tracks() {
                    swarm_sink.publish_track(omnisight_core::swarm::TrackMessage {
                        camera_id: "camera-0".to_string(),
                        track_id: track.track_id,
                        position: omnisight_core::swarm::GlobalPosition { x: track.predicted_bbox().center().0, y: track.predicted_bbox().center().1, z: 0.0 },
                        velocity_x: track.velocity().0 as f32,
                        velocity_y: track.velocity().1 as f32,
                        object_class: format!("{:?}", track.class),
                        confidence: track.confidence,
                        timestamp_ms: t_ms,
                        behaviors: track.behaviors,
                        threat: track.threat,
                    });
                }
            }
            Err(e) => {
                warn!(error = %e, "timeline engine update failed");
                stats.update(|s| s.resource_exhausted_count += 1);
            }
        }

        drain_swarm(swarm_source.as_mut());

        stats.update(|s| {
            s.frames_processed += 1;
            s.frames_per_second = if frame_period.as_secs_f32() > 0.0 { 1.0 / frame_period.as_secs_f32() } else { 0.0 };
            s.tracked_objects = track_records.len() as u32;
        });

        if t_ms.saturating_sub(last_stats_write_ms) >= config.ipc.stats_update_interval_ms {
            write_stats(&config, &stats.snapshot());
            write_status(&config, &StatusSnapshot::new(ProcessStatus::Running, t_ms, started_at_ms));
            last_stats_write_ms = t_ms;
        }

        tick += 1;
        std::thread::sleep(frame_period);
    }

    info!("producer loop stopping");
    write_status(&config, &StatusSnapshot::new(ProcessStatus::Stopping, now_ms(), started_at_ms));
    running.store(false, Ordering::Release);
    listener_handle.join().ok();
    write_status(&config, &StatusSnapshot::new(ProcessStatus::Stopping, now_ms(), started_at_ms));
}

fn drain_swarm(source: &mut dyn SwarmSource) {
    for track in source.poll_tracks() {
        debug!(track_id = track.track_id, camera_id = %track.camera_id, "swarm track hand-off received");
    }
    for event in source.poll_events() {
        debug!(event_id = event.event_id, camera_id = %event.camera_id, "swarm event hand-off received");
    }
    for model in source.poll_model_updates() {
        debug!(camera_id = %model.camera_id, version = model.version, "swarm model update received");
    }
    for consensus in source.poll_consensus() {
        debug!(event_id = consensus.event_id, "swarm consensus received");
    }
}

fn write_stats(config: &Config, stats: &omnisight_core::PipelineStats) {
    if let Err(e) = omnisight_core::ipc::status::write_stats_atomic(&config.ipc.json_stats, stats) {
        warn!(error = %e, "failed to write stats file");
    }
}

fn write_status(config: &Config, status: &StatusSnapshot) {
    if let Err(e) = omnisight_core::ipc::status::write_status_atomic(&config.ipc.json_status, status) {
        warn!(error = %e, "failed to write status file");
    }
}
