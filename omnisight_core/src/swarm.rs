//! Swarm hand-off boundary: the core treats camera-to-camera
//! communication as an opaque sink/source pair (§1 "Out of scope", §6
//! "Swarm sink/source"). The MQTT transport itself is an external
//! collaborator; this module only defines the message shapes and the
//! trait the producer loop calls into.

use serde::{Deserialize, Serialize};

use crate::event_predictor::EventType;
use crate::tracker::BehaviorFlags;

/// World position in meters, as handed to peer cameras. Opaque to this
/// core beyond forwarding it — no geodetic indexing is performed here
/// (see DESIGN.md "Dropped from the teacher").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GlobalPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Low-QoS, fire-and-forget track hand-off (§6 `publish_track`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackMessage {
    pub camera_id: String,
    pub track_id: u32,
    pub position: GlobalPosition,
    pub velocity_x: f32,
    pub velocity_y: f32,
    pub object_class: String,
    pub confidence: f32,
    pub timestamp_ms: u64,
    pub behaviors: BehaviorFlags,
    pub threat: f32,
}

/// Reliable event hand-off (§6 `publish_event`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub camera_id: String,
    pub event_id: u32,
    pub event_type: EventType,
    pub position: GlobalPosition,
    pub track_id: u32,
    pub probability: f32,
    pub severity: crate::event_predictor::SeverityLevel,
    pub predicted_time_ms: u64,
    pub timestamp_ms: u64,
}

/// A federated-learning gradient/weight update exchanged between peers.
/// The aggregator itself lives outside this core (§1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeightsMessage {
    pub camera_id: String,
    pub version: u32,
    pub weights: Vec<f32>,
    pub timestamp_ms: u64,
}

/// Multi-camera event consensus: how many peer cameras corroborate an
/// event this camera (or another) reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub event_id: u32,
    pub initiating_camera: String,
    pub confirming_cameras: Vec<String>,
    pub aggregated_confidence: f32,
    pub timestamp_ms: u64,
}

/// The categories a `SwarmSource` subscription can be registered against
/// (§6 `subscribe(track|event|model|consensus, callback)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmTopic {
    Track,
    Event,
    Model,
    Consensus,
}

/// Outbound half of the swarm boundary. Implemented by the swarm-I/O
/// collaborator (the `agent` binary); the core only calls these methods,
/// never constructs a transport itself.
pub trait SwarmSink: Send {
    fn publish_track(&self, message: TrackMessage);
    fn publish_event(&self, message: EventMessage);
}

/// Inbound half. `poll` is called once per producer tick and must not
/// block — the swarm I/O thread enqueues into its own channel and the
/// producer drains it here, never mutating tracker/timeline state from a
/// foreign-thread callback (§9 "Concurrency model substitution").
pub trait SwarmSource: Send {
    fn poll_tracks(&mut self) -> Vec<TrackMessage>;
    fn poll_events(&mut self) -> Vec<EventMessage>;
    fn poll_model_updates(&mut self) -> Vec<ModelWeightsMessage>;
    fn poll_consensus(&mut self) -> Vec<ConsensusMessage>;
}

/// A `SwarmSink`/`SwarmSource` that does nothing; used when the swarm
/// layer is disabled (single-camera deployments, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSwarm;

impl SwarmSink for NullSwarm {
    fn publish_track(&self, _message: TrackMessage) {}
    fn publish_event(&self, _message: EventMessage) {}
}

impl SwarmSource for NullSwarm {
    fn poll_tracks(&mut self) -> Vec<TrackMessage> {
        Vec::new()
    }
    fn poll_events(&mut self) -> Vec<EventMessage> {
        Vec::new()
    }
    fn poll_model_updates(&mut self) -> Vec<ModelWeightsMessage> {
        Vec::new()
    }
    fn poll_consensus(&mut self) -> Vec<ConsensusMessage> {
        Vec::new()
    }
}

/// Optional cryptographic provenance envelope for swarm packets, behind
/// the default-off `swarm-auth` feature (DESIGN.md). No packet on the
/// swarm boundary requires this in-core; it exists for deployments that
/// want sender authentication without trusting the transport.
#[cfg(feature = "swarm-auth")]
pub mod auth {
    use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, thiserror::Error)]
    pub enum SwarmAuthError {
        #[error("invalid signature on swarm packet")]
        InvalidSignature,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct SignedSwarmPacket {
        pub payload: Vec<u8>,
        #[serde(with = "sig_serde")]
        pub signature: Signature,
        #[serde(with = "key_serde")]
        pub public_key: VerifyingKey,
    }

    impl SignedSwarmPacket {
        pub fn sign(payload: Vec<u8>, signing_key: &SigningKey) -> Self {
            let signature = signing_key.sign(&payload);
            Self { payload, signature, public_key: signing_key.verifying_key() }
        }

        pub fn verify(&self) -> Result<(), SwarmAuthError> {
            self.public_key
                .verify(&self.payload, &self.signature)
                .map_err(|_| SwarmAuthError::InvalidSignature)
        }
    }

    mod sig_serde {
        use ed25519_dalek::Signature;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(sig: &Signature, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_bytes(&sig.to_bytes())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Signature, D::Error> {
            let bytes: Vec<u8> = Deserialize::deserialize(d)?;
            Signature::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }

    mod key_serde {
        use ed25519_dalek::VerifyingKey;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(key: &VerifyingKey, s: S) -> Result<S::Ok, S::Error> {
            s.serialize_bytes(key.as_bytes())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<VerifyingKey, D::Error> {
            let bytes: Vec<u8> = Deserialize::deserialize(d)?;
            let arr: [u8; 32] = bytes.try_into().map_err(|_| serde::de::Error::custom("bad key length"))?;
            VerifyingKey::from_bytes(&arr).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_swarm_is_inert() {
        let sink = NullSwarm;
        sink.publish_track(TrackMessage {
            camera_id: "cam-1".into(),
            track_id: 1,
            position: GlobalPosition { x: 0.0, y: 0.0, z: 0.0 },
            velocity_x: 0.0,
            velocity_y: 0.0,
            object_class: "person".into(),
            confidence: 0.9,
            timestamp_ms: 0,
            behaviors: BehaviorFlags::NORMAL,
            threat: 0.0,
        });
        let mut source = NullSwarm;
        assert!(source.poll_tracks().is_empty());
        assert!(source.poll_events().is_empty());
    }
}
