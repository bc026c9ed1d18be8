//! Recording session
//!
//! A full, unbounded logger. While armed it appends every inbound and
//! outbound packet, plus out-of-band custom channel writes, to a growing
//! in-memory session log. `stop` serializes the accumulated log and keeps
//! it around, so repeated calls return the same text until the next `start`.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec;
use crate::codec::payload::PayloadValue;
use crate::types::{Direction, PacketEntry, ProtocolState, SessionLog};

/// Configuration for the recorder.
#[derive(Debug, Clone, Default)]
pub struct RecorderConfig {
    /// Replace binary payload leaves with a size-only redaction marker.
    /// Shrinks the log at the cost of replayability.
    pub redact_binary: bool,
}

/// Full-fidelity session logger, user-armed.
pub struct Recorder {
    config: RecorderConfig,
    log: SessionLog,
    armed: bool,
    /// Next sequence position per direction (server, client).
    next_seq: [u64; 2],
    /// Timestamp of the previous server-originated packet.
    last_server_ts: Option<u64>,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            log: SessionLog::new(""),
            armed: false,
            next_seq: [0, 0],
            last_server_ts: None,
        }
    }

    /// Reset the in-memory log and arm the session.
    pub fn start(&mut self, protocol_version: &str) {
        self.log = SessionLog::new(protocol_version);
        self.next_seq = [0, 0];
        self.last_server_ts = None;
        self.armed = true;
        tracing::info!(protocol_version, "recording started");
    }

    /// Disarm and serialize the accumulated log.
    pub fn stop(&mut self) -> String {
        if self.armed {
            self.armed = false;
            tracing::info!(entries = self.log.entries.len(), "recording stopped");
        }
        codec::serialize(&self.log)
    }

    pub fn is_recording(&self) -> bool {
        self.armed
    }

    /// Number of entries accumulated so far.
    pub fn entry_count(&self) -> usize {
        self.log.entries.len()
    }

    /// Append a packet observed on the live connection. No-op unless armed.
    pub fn record_packet(
        &mut self,
        direction: Direction,
        name: &str,
        state: ProtocolState,
        payload: PayloadValue,
    ) {
        self.record_packet_at(now_ms(), direction, name, state, payload);
    }

    /// Append an out-of-band custom channel write. No-op unless armed.
    ///
    /// Tagged distinctly so replay can special-case it: custom channel
    /// entries are inert markers, never correlated by the packet waiter.
    pub fn record_custom_write(&mut self, channel: &str, payload: PayloadValue) {
        if !self.armed {
            return;
        }
        let payload = self.prepare(payload);
        let sequence = self.take_seq(Direction::FromClient);
        self.log.entries.push(PacketEntry {
            name: channel.to_string(),
            state: ProtocolState::Play,
            direction: Direction::FromClient,
            payload,
            sequence,
            timestamp_ms: now_ms(),
            time_diff_ms: None,
            custom_channel: true,
        });
    }

    fn record_packet_at(
        &mut self,
        timestamp_ms: u64,
        direction: Direction,
        name: &str,
        state: ProtocolState,
        payload: PayloadValue,
    ) {
        if !self.armed {
            return;
        }
        let payload = self.prepare(payload);
        let time_diff_ms = match direction {
            Direction::FromServer => {
                let diff = self
                    .last_server_ts
                    .map(|prev| timestamp_ms.saturating_sub(prev));
                self.last_server_ts = Some(timestamp_ms);
                diff
            }
            Direction::FromClient => None,
        };
        let sequence = self.take_seq(direction);
        self.log.entries.push(PacketEntry {
            name: name.to_string(),
            state,
            direction,
            payload,
            sequence,
            timestamp_ms,
            time_diff_ms,
            custom_channel: false,
        });
    }

    fn prepare(&self, payload: PayloadValue) -> PayloadValue {
        if self.config.redact_binary {
            payload.redacted()
        } else {
            payload
        }
    }

    fn take_seq(&mut self, direction: Direction) -> u64 {
        let slot = match direction {
            Direction::FromServer => 0,
            Direction::FromClient => 1,
        };
        let seq = self.next_seq[slot];
        self.next_seq[slot] += 1;
        seq
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disarmed_recorder_ignores_packets() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.record_packet(
            Direction::FromServer,
            "keep_alive",
            ProtocolState::Play,
            PayloadValue::Null,
        );
        assert_eq!(recorder.entry_count(), 0);
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_sequences_per_direction() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start("1.21.4");

        for name in ["a", "b"] {
            recorder.record_packet(
                Direction::FromServer,
                name,
                ProtocolState::Play,
                PayloadValue::Null,
            );
        }
        recorder.record_packet(
            Direction::FromClient,
            "c",
            ProtocolState::Play,
            PayloadValue::Null,
        );

        let log = codec::parse(&recorder.stop()).unwrap();
        assert_eq!(log.entries[0].sequence, 0);
        assert_eq!(log.entries[1].sequence, 1);
        // Client counter is independent of the server counter.
        assert_eq!(log.entries[2].sequence, 0);
    }

    #[test]
    fn test_server_time_diffs() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start("1.21.4");

        recorder.record_packet_at(
            1_000,
            Direction::FromServer,
            "a",
            ProtocolState::Play,
            PayloadValue::Null,
        );
        recorder.record_packet_at(
            1_250,
            Direction::FromClient,
            "b",
            ProtocolState::Play,
            PayloadValue::Null,
        );
        recorder.record_packet_at(
            1_400,
            Direction::FromServer,
            "c",
            ProtocolState::Play,
            PayloadValue::Null,
        );

        let log = codec::parse(&recorder.stop()).unwrap();
        // First server packet has no predecessor.
        assert_eq!(log.entries[0].time_diff_ms, None);
        // Client packets never carry a diff.
        assert_eq!(log.entries[1].time_diff_ms, None);
        // Diff is measured server-to-server, ignoring the client packet.
        assert_eq!(log.entries[2].time_diff_ms, Some(400));
    }

    #[test]
    fn test_stop_is_idempotent_until_restart() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start("1.21.4");
        recorder.record_packet(
            Direction::FromServer,
            "a",
            ProtocolState::Play,
            PayloadValue::Null,
        );

        let first = recorder.stop();
        let second = recorder.stop();
        assert_eq!(first, second);

        recorder.start("1.21.4");
        let log = codec::parse(&recorder.stop()).unwrap();
        assert!(log.entries.is_empty());
    }

    #[test]
    fn test_custom_channel_writes_tagged() {
        let mut recorder = Recorder::new(RecorderConfig::default());
        recorder.start("1.21.4");
        recorder.record_custom_write(
            "tapedeck:control",
            PayloadValue::Text("marker".into()),
        );

        let log = codec::parse(&recorder.stop()).unwrap();
        assert!(log.entries[0].custom_channel);
        assert_eq!(log.entries[0].direction, Direction::FromClient);
    }

    #[test]
    fn test_redaction_mode_strips_buffers() {
        let mut recorder = Recorder::new(RecorderConfig {
            redact_binary: true,
        });
        recorder.start("1.21.4");
        recorder.record_packet(
            Direction::FromServer,
            "map_chunk",
            ProtocolState::Play,
            PayloadValue::map([("data", PayloadValue::Binary(vec![0; 512]))]),
        );

        let text = recorder.stop();
        assert!(!text.contains("\"Buffer\""));
        assert!(text.contains("RedactedBuffer"));
    }
}
