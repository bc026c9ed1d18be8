//! Error taxonomy for the capture/replay core
//!
//! Format and direction validation errors surface synchronously at load
//! time, before any live connection is opened. Runtime faults during
//! playback are funneled through the player's fault channel instead of this
//! module; waiter timeouts are control flow, not errors.

use thiserror::Error;

use crate::types::FORMAT_VERSION;

/// Session log codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The log text contains no header line.
    #[error("session log is empty")]
    Empty,

    /// The header declares a format revision this build does not support.
    #[error("unsupported log format version {found} (supported: {FORMAT_VERSION})")]
    UnsupportedFormat { found: u32 },

    /// A line failed to parse or violated an ordering invariant.
    #[error("malformed session log at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

/// Failures surfaced by the live connection boundary.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to establish live connection: {0}")]
    Connect(String),

    #[error("live connection is closed")]
    Closed,

    #[error("failed to write packet: {0}")]
    Write(String),
}

/// Failures when loading a replay.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The log was captured for replay against a server, which is a known,
    /// intentionally unsupported direction.
    #[error("replaying against the server side is not supported")]
    UnsupportedDirection,

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Packet waiter misuse.
#[derive(Debug, Error)]
pub enum WaiterError {
    /// A wait was started while a previous one on the same instance is still
    /// unresolved. This indicates a bug in the caller, not a runtime
    /// condition to recover from.
    #[error("a packet wait is already in progress")]
    AlreadyWaiting,
}
