//! Named-pipe command channel (§6 "Python -> C commands"). The pipe
//! itself carries line-delimited JSON; this module only owns parsing the
//! request and encoding the acknowledgment, so the transport can be a
//! real FIFO, a plain file, or (in tests) an in-memory buffer.

use serde::{Deserialize, Serialize};

use crate::error::IpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Unknown,
    Ping,
    ConfigUpdate,
    RefreshTimelines,
    SyncSwarm,
    Shutdown,
}

/// One line of the command pipe (§6 command frame: `{type, request_id, data}`).
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub request_id: String,
    #[serde(default = "serde_json::Value::default")]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Error,
}

/// One line of the ack pipe (§6 ack frame: `{request_id, status, timestamp, message}`).
#[derive(Debug, Clone, Serialize)]
pub struct CommandAck {
    pub request_id: String,
    pub status: AckStatus,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    pub message: String,
}

impl CommandAck {
    pub fn ok(request_id: impl Into<String>, timestamp_ms: u64, message: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), status: AckStatus::Success, timestamp_ms, message: message.into() }
    }

    pub fn error(request_id: impl Into<String>, timestamp_ms: u64, message: impl Into<String>) -> Self {
        Self { request_id: request_id.into(), status: AckStatus::Error, timestamp_ms, message: message.into() }
    }
}

/// Parse one command line. A line that isn't valid JSON, or is missing a
/// required field, folds into `IpcError::MalformedCommand` rather than
/// panicking (§7 "malformed command never aborts the command thread").
pub fn parse_command(line: &str) -> Result<Command, IpcError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(IpcError::MalformedCommand("empty command line".to_string()));
    }
    serde_json::from_str(trimmed).map_err(|e| IpcError::MalformedCommand(e.to_string()))
}

/// Encode one ack line (newline-terminated, ready to append to the ack pipe).
pub fn encode_ack(ack: &CommandAck) -> String {
    let mut line = serde_json::to_string(ack).expect("CommandAck always serializes");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_command_parses() {
        let cmd = parse_command(r#"{"type":"PING","request_id":"r-1"}"#).unwrap();
        assert_eq!(cmd.command_type, CommandType::Ping);
        assert_eq!(cmd.request_id, "r-1");
    }

    #[test]
    fn config_update_carries_data_payload() {
        let cmd = parse_command(r#"{"type":"CONFIG_UPDATE","request_id":"r-2","data":{"tracker":{"min_hits":5}}}"#).unwrap();
        assert_eq!(cmd.command_type, CommandType::ConfigUpdate);
        assert_eq!(cmd.data["tracker"]["min_hits"], 5);
    }

    #[test]
    fn malformed_json_is_reported_not_panicked() {
        let err = parse_command("not json");
        assert!(matches!(err, Err(IpcError::MalformedCommand(_))));
    }

    #[test]
    fn ack_round_trips_through_json() {
        let ack = CommandAck::ok("r-3", 1000, "pong");
        let line = encode_ack(&ack);
        let parsed: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["request_id"], "r-3");
        assert_eq!(parsed["status"], "success");
        assert_eq!(parsed["timestamp"], 1000);
    }
}
