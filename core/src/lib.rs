//! Tapedeck Core - Session capture and replay
//!
//! An embedded capture-and-replay subsystem for a stateful, binary,
//! bidirectional game protocol. It records every packet exchanged between a
//! live client and its peer into a portable session log, and later replays
//! that log against a fresh live connection: server-originated packets are
//! re-driven at their recorded (speed-scaled) intervals, while the new
//! client's own outgoing packets are correlated against what was originally
//! observed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Capture                              │
//! │ live connection → TapeDeck pump → RingCapture (always)   │
//! │                                 → Recorder (when armed)  │
//! └──────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Replay                               │
//! │ log text → codec::parse → Player task                    │
//! │   FROM_SERVER entries → conn.write at paced intervals    │
//! │   FROM_CLIENT entries → PacketWaiter ← live client       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The protocol handshake, payload semantics, and all rendering belong to
//! the surrounding application; this crate only sees named, directional
//! packet events and a `write(name, payload)` call.

pub mod codec;
pub mod connection;
pub mod deck;
pub mod error;
pub mod player;
pub mod recorder;
pub mod ring;
pub mod types;
pub mod waiter;

// Re-export the payload tree
pub use codec::payload::PayloadValue;

// Re-export core types
pub use types::{
    Direction, PacketEntry, ProtocolState, ReplayTarget, SessionHeader, SessionLog,
    FORMAT_VERSION, PACKETS_LOG_EXT, SESSION_LOG_EXT,
};

// Re-export the error taxonomy
pub use error::{CodecError, ConnectionError, LoadError, WaiterError};

// Re-export the connection seam
pub use connection::{ConnectionFactory, Fault, LiveConnection, PacketEvent};

// Re-export capture
pub use recorder::{Recorder, RecorderConfig};
pub use ring::{RingCapture, RingEntry, DEFAULT_RING_CAPACITY};

// Re-export the waiter
pub use waiter::{
    PacketWaiter, SilentObserver, WaitOutcome, WaiterConfig, WaiterObserver,
    DEFAULT_UNEXPECTED_LIMIT,
};

// Re-export playback
pub use deck::TapeDeck;
pub use player::{
    PlaybackObserver, PlaybackPhase, Player, PlayerHandle, PlayerOptions, Progress,
    SilentPlayback, CLIENT_BATCH_TIMEOUT_MS, PAUSE_POLL_INTERVAL_MS,
};
