//! Swarm hand-off bridge: forwards track/event hand-offs from an
//! `omnisight_core` process onto the camera-to-camera swarm over `zenoh`,
//! and feeds whatever peer cameras publish back into the core's
//! `SwarmSource` boundary.
//!
//! The core treats the swarm as an opaque sink/source pair (spec §1, §6);
//! this binary is the external collaborator that actually owns the
//! transport. It never touches tracker/behavior/timeline state directly —
//! it only marshals `TrackMessage`/`EventMessage` onto zenoh key
//! expressions and hands inbound ones off through a channel for a
//! producer loop to drain at the top of its tick (§9 "concurrency model
//! substitution").

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::Parser;
use omnisight_core::swarm::{ConsensusMessage, EventMessage, GlobalPosition, ModelWeightsMessage, SwarmSink, SwarmSource, TrackMessage};
use omnisight_core::BehaviorFlags;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zenoh::Config;

const KEY_TRACK: &str = "omnisight/swarm/track";
const KEY_EVENT: &str = "omnisight/swarm/event";
const KEY_MODEL: &str = "omnisight/swarm/model";
const KEY_CONSENSUS: &str = "omnisight/swarm/consensus";

#[derive(Parser, Debug)]
#[command(name = "omnisight-agent", about = "Camera-to-camera swarm hand-off bridge")]
struct Cli {
    /// Identifier this camera announces itself as on the swarm.
    #[arg(long, env = "OMNISIGHT_CAMERA_ID", default_value = "camera-0")]
    camera_id: String,

    /// Zenoh config file (defaults to zenoh's built-in peer config).
    #[arg(long)]
    zenoh_config: Option<String>,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

trait HasCameraId {
    fn camera_id(&self) -> &str;
}

impl HasCameraId for TrackMessage {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }
}

impl HasCameraId for EventMessage {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }
}

impl HasCameraId for ModelWeightsMessage {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }
}

impl HasCameraId for ConsensusMessage {
    fn camera_id(&self) -> &str {
        &self.initiating_camera
    }
}

/// Subscribe to `key`, decode every inbound sample as JSON, and forward it
/// into `tx`. Samples this camera published itself are dropped rather
/// than echoed back — the swarm has no broker to dedup on peers' behalf.
fn spawn_subscriber<T>(session: Arc<zenoh::Session>, key: &'static str, tx: mpsc::UnboundedSender<T>, camera_id: String)
where
    T: serde::de::DeserializeOwned + HasCameraId + Send + 'static,
{
    tokio::spawn(async move {
        let subscriber = match session.declare_subscriber(key).await {
            Ok(s) => s,
            Err(e) => {
                warn!(%key, error = %e, "failed to declare swarm subscriber");
                return;
            }
        };
        while let Ok(sample) = subscriber.recv_async().await {
            let bytes = sample.payload().to_bytes();
            match serde_json::from_slice::<T>(&bytes) {
                Ok(msg) if msg.camera_id() == camera_id => {
                    debug!(%key, "ignoring own swarm publish");
                }
                Ok(msg) => {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(%key, error = %e, "malformed swarm message"),
            }
        }
    });
}

/// `SwarmSink`/`SwarmSource` implementation backed by a live zenoh
/// session. Publishing hands the serialized payload to a background task
/// over an unbounded channel so the trait's synchronous contract never
/// blocks the producer loop on network I/O.
struct ZenohSwarm {
    camera_id: String,
    publish_tx: mpsc::UnboundedSender<(&'static str, Vec<u8>)>,
    track_rx: mpsc::UnboundedReceiver<TrackMessage>,
    event_rx: mpsc::UnboundedReceiver<EventMessage>,
    model_rx: mpsc::UnboundedReceiver<ModelWeightsMessage>,
    consensus_rx: mpsc::UnboundedReceiver<ConsensusMessage>,
}

impl ZenohSwarm {
    async fn connect(camera_id: String, config: Config) -> Result<Self> {
        let session = Arc::new(zenoh::open(config).await.map_err(|e| anyhow::anyhow!("{e}"))?);

        let (publish_tx, mut publish_rx) = mpsc::unbounded_channel::<(&'static str, Vec<u8>)>();
        let publish_session = session.clone();
        tokio::spawn(async move {
            while let Some((key, bytes)) = publish_rx.recv().await {
                if let Err(e) = publish_session.put(key, bytes).await {
                    warn!(%key, error = %e, "swarm publish failed");
                }
            }
        });

        let (track_tx, track_rx) = mpsc::unbounded_channel();
        spawn_subscriber(session.clone(), KEY_TRACK, track_tx, camera_id.clone());

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        spawn_subscriber(session.clone(), KEY_EVENT, event_tx, camera_id.clone());

        let (model_tx, model_rx) = mpsc::unbounded_channel();
        spawn_subscriber(session.clone(), KEY_MODEL, model_tx, camera_id.clone());

        let (consensus_tx, consensus_rx) = mpsc::unbounded_channel();
        spawn_subscriber(session.clone(), KEY_CONSENSUS, consensus_tx, camera_id.clone());

        Ok(Self { camera_id, publish_tx, track_rx, event_rx, model_rx, consensus_rx })
    }
}

impl SwarmSink for ZenohSwarm {
    fn publish_track(&self, message: TrackMessage) {
        match serde_json::to_vec(&message) {
            Ok(bytes) => {
                if self.publish_tx.send((KEY_TRACK, bytes)).is_err() {
                    warn!("swarm publish task is gone, dropping track hand-off");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode track hand-off"),
        }
    }

    fn publish_event(&self, message: EventMessage) {
        match serde_json::to_vec(&message) {
            Ok(bytes) => {
                if self.publish_tx.send((KEY_EVENT, bytes)).is_err() {
                    warn!("swarm publish task is gone, dropping event hand-off");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode event hand-off"),
        }
    }
}

impl SwarmSource for ZenohSwarm {
    fn poll_tracks(&mut self) -> Vec<TrackMessage> {
        drain(&mut self.track_rx)
    }

    fn poll_events(&mut self) -> Vec<EventMessage> {
        drain(&mut self.event_rx)
    }

    fn poll_model_updates(&mut self) -> Vec<ModelWeightsMessage> {
        drain(&mut self.model_rx)
    }

    fn poll_consensus(&mut self) -> Vec<ConsensusMessage> {
        drain(&mut self.consensus_rx)
    }
}

fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match &cli.zenoh_config {
        Some(path) => Config::from_file(path).map_err(|e| anyhow::anyhow!("{e}")).context("loading zenoh config")?,
        None => Config::default(),
    };

    info!(camera_id = %cli.camera_id, "connecting to swarm");
    let mut swarm = ZenohSwarm::connect(cli.camera_id.clone(), config).await?;

    // This binary is the long-lived swarm-I/O thread a producer loop
    // hands `publish_track`/`publish_event` calls to and polls for
    // inbound hand-offs (§5). Run standalone, with no attached core, it
    // just relays and logs what peers publish, and announces itself with
    // a periodic heartbeat so it's visible on the swarm.
    loop {
        for track in swarm.poll_tracks() {
            info!(track_id = track.track_id, camera_id = %track.camera_id, "peer track hand-off");
        }
        for event in swarm.poll_events() {
            info!(event_id = event.event_id, camera_id = %event.camera_id, ?event.event_type, "peer event hand-off");
        }
        for model in swarm.poll_model_updates() {
            info!(camera_id = %model.camera_id, version = model.version, "peer model update");
        }
        for consensus in swarm.poll_consensus() {
            info!(event_id = consensus.event_id, confirmations = consensus.confirming_cameras.len(), "peer consensus");
        }

        swarm.publish_track(TrackMessage {
            camera_id: swarm.camera_id.clone(),
            track_id: 0,
            position: GlobalPosition { x: 0.0, y: 0.0, z: 0.0 },
            velocity_x: 0.0,
            velocity_y: 0.0,
            object_class: "heartbeat".to_string(),
            confidence: 0.0,
            timestamp_ms: now_ms(),
            behaviors: BehaviorFlags::NORMAL,
            threat: 0.0,
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
