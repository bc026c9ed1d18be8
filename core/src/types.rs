//! Core types for the capture/replay system
//!
//! This module defines the data structures shared by the log codec, the
//! recorder, and the replay player. Field names are pinned with serde
//! renames because they are part of the on-disk log format.

use serde::{Deserialize, Serialize};

use crate::codec::payload::PayloadValue;

/// The single log format revision this build reads and writes.
pub const FORMAT_VERSION: u32 = 1;

/// File extension for packets-only session logs.
pub const PACKETS_LOG_EXT: &str = "tdpackets";

/// File extension for full-session logs (packets plus enough session state
/// to cold-start a world; the extra state is produced elsewhere, but both
/// variants share this header and the `protocol_version` field used to
/// select the protocol for a fresh live connection).
pub const SESSION_LOG_EXT: &str = "tdsession";

/// Which side of the original connection the log is replayed against.
///
/// Only [`ReplayTarget::Client`] is supported: the log's server packets are
/// re-driven against a fresh live client. Replaying against a server is a
/// known, intentionally unsupported direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayTarget {
    #[default]
    Client,
    Server,
}

/// Protocol state a packet was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolState {
    Handshake,
    Login,
    Configuration,
    Play,
}

/// Direction of a logged packet, relative to the original capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    FromServer,
    FromClient,
}

/// Session log header. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHeader {
    /// Log format revision; anything but [`FORMAT_VERSION`] is rejected.
    #[serde(rename = "formatVersion")]
    pub format_version: u32,
    /// Protocol version the session was captured with. Selects the protocol
    /// for the fresh live connection at replay time.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Which side the log is replayed against.
    #[serde(rename = "replayAgainst", default)]
    pub replay_against: ReplayTarget,
}

impl SessionHeader {
    /// Header for a newly started capture.
    pub fn new(protocol_version: impl Into<String>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            protocol_version: protocol_version.into(),
            replay_against: ReplayTarget::Client,
        }
    }
}

/// One captured packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketEntry {
    pub name: String,
    pub state: ProtocolState,
    pub direction: Direction,
    pub payload: PayloadValue,
    /// Strictly increasing per direction; defines replay order, never reused.
    #[serde(rename = "sequencePosition")]
    pub sequence: u64,
    /// Capture wall-clock time in milliseconds.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    /// Milliseconds since the previous server-originated packet. Only set on
    /// [`Direction::FromServer`] entries; drives replay pacing.
    #[serde(
        rename = "timeDiffFromPreviousServerPacketMs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub time_diff_ms: Option<u64>,
    /// Marks an out-of-band custom channel write. Inert during replay: never
    /// handed to the packet waiter, never written to the live connection.
    #[serde(rename = "customChannel", default, skip_serializing_if = "is_false")]
    pub custom_channel: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// A full captured session: header plus ordered packet entries.
///
/// Append-only while recording, read-only while replaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    pub header: SessionHeader,
    pub entries: Vec<PacketEntry>,
}

impl SessionLog {
    /// Empty log for the given protocol version.
    pub fn new(protocol_version: impl Into<String>) -> Self {
        Self {
            header: SessionHeader::new(protocol_version),
            entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_defaults() {
        let header = SessionHeader::new("1.21.4");
        assert_eq!(header.format_version, FORMAT_VERSION);
        assert_eq!(header.replay_against, ReplayTarget::Client);
    }

    #[test]
    fn test_replay_against_defaults_to_client() {
        // Logs written before the field existed omit it entirely.
        let json = r#"{"formatVersion":1,"protocolVersion":"1.21.4"}"#;
        let header: SessionHeader = serde_json::from_str(json).unwrap();
        assert_eq!(header.replay_against, ReplayTarget::Client);
    }

    #[test]
    fn test_direction_wire_names() {
        assert_eq!(
            serde_json::to_string(&Direction::FromServer).unwrap(),
            "\"FROM_SERVER\""
        );
        assert_eq!(
            serde_json::to_string(&ProtocolState::Play).unwrap(),
            "\"PLAY\""
        );
        assert_eq!(
            serde_json::to_string(&ReplayTarget::Client).unwrap(),
            "\"client\""
        );
    }

    #[test]
    fn test_entry_optional_fields_omitted() {
        let entry = PacketEntry {
            name: "keep_alive".into(),
            state: ProtocolState::Play,
            direction: Direction::FromClient,
            payload: PayloadValue::Null,
            sequence: 0,
            timestamp_ms: 0,
            time_diff_ms: None,
            custom_channel: false,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("timeDiffFromPreviousServerPacketMs"));
        assert!(!json.contains("customChannel"));
    }
}
