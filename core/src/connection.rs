//! Live connection boundary
//!
//! The core never talks to the network itself; it drives a live protocol
//! connection through the traits defined here. Packet and fault delivery is
//! modeled as explicit publish/subscribe: a subscription is a broadcast
//! receiver that is dropped on teardown, so no listener outlives the replay
//! session that created it.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::codec::payload::PayloadValue;
use crate::error::ConnectionError;
use crate::types::{Direction, ProtocolState};

/// A packet observed on the live connection, in either direction.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub direction: Direction,
    pub name: String,
    pub state: ProtocolState,
    pub payload: PayloadValue,
}

/// An error-level diagnostic emitted by the live connection.
#[derive(Debug, Clone)]
pub struct Fault {
    pub message: String,
}

/// The active protocol session for the application.
///
/// Required from the outside world: a packet event stream, a fault stream,
/// and a way to write a named packet outward. The core offers nothing back
/// through this trait; protocol internals stay on the other side.
pub trait LiveConnection: Send + Sync {
    /// Protocol version this connection speaks.
    fn protocol_version(&self) -> String;

    /// Send a packet to the peer.
    fn write(&self, name: &str, payload: &PayloadValue) -> Result<(), ConnectionError>;

    /// Subscribe to packet events in both directions.
    fn subscribe_packets(&self) -> broadcast::Receiver<PacketEvent>;

    /// Subscribe to the connection's fault channel.
    fn subscribe_faults(&self) -> broadcast::Receiver<Fault>;
}

/// Opens fresh live connections for replay.
///
/// The replay player calls this only after the session header has been
/// validated; a rejected log never causes a connection attempt.
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, protocol_version: &str) -> Result<Arc<dyn LiveConnection>, ConnectionError>;
}
