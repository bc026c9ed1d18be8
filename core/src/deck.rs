//! Capture/replay facade
//!
//! [`TapeDeck`] ties the always-on ring capture and the user-armed recorder
//! to one live connection, and hands serialized logs to the replay player.
//! One deck drives one connection; attach on connect, detach on disconnect.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};

use crate::codec::payload::PayloadValue;
use crate::connection::{ConnectionFactory, LiveConnection, PacketEvent};
use crate::error::LoadError;
use crate::player::{Player, PlayerHandle, PlayerOptions, PlaybackObserver};
use crate::recorder::{Recorder, RecorderConfig};
use crate::ring::{RingCapture, RingEntry};

struct Pump {
    shutdown: watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

/// Capture-and-replay surface consumed by the presentation layer.
pub struct TapeDeck {
    recorder: Arc<Mutex<Recorder>>,
    ring: Arc<Mutex<RingCapture>>,
    pump: Option<Pump>,
    protocol_version: Option<String>,
}

impl TapeDeck {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            recorder: Arc::new(Mutex::new(Recorder::new(config))),
            ring: Arc::new(Mutex::new(RingCapture::default())),
            pump: None,
            protocol_version: None,
        }
    }

    /// Follow a live connection: every packet event feeds the ring capture,
    /// and the recorder too while armed. The previous connection's ring is
    /// discarded. Must be called from within a tokio runtime.
    pub fn attach(&mut self, conn: &Arc<dyn LiveConnection>) {
        self.detach();
        self.protocol_version = Some(conn.protocol_version());
        *lock(&self.ring) = RingCapture::default();

        let packets = conn.subscribe_packets();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(pump_events(
            packets,
            self.recorder.clone(),
            self.ring.clone(),
            shutdown_rx,
        ));
        self.pump = Some(Pump { shutdown, task });
        tracing::debug!("tape deck attached to live connection");
    }

    /// Stop following the current connection and drop its subscription.
    pub fn detach(&mut self) {
        if let Some(pump) = self.pump.take() {
            let _ = pump.shutdown.send(true);
            pump.task.abort();
        }
    }

    /// Arm the full recorder against the attached connection's protocol
    /// version. Resets any previously accumulated log.
    pub fn start_recording(&self) {
        let version = self.protocol_version.clone().unwrap_or_default();
        lock(&self.recorder).start(&version);
    }

    /// Disarm and return the serialized log. Repeated calls return the same
    /// text until the next `start_recording`.
    pub fn stop_recording(&self) -> String {
        lock(&self.recorder).stop()
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.recorder).is_recording()
    }

    /// Log an out-of-band custom channel write. Recorded as an inert marker;
    /// replay never correlates it.
    pub fn record_custom_write(&self, channel: &str, payload: PayloadValue) {
        lock(&self.recorder).record_custom_write(channel, payload);
    }

    /// Serialize the ring capture's current contents as a packets-only log.
    /// Available at any time, even outside an active recording.
    pub fn dump_ring_capture(&self) -> String {
        let version = self.protocol_version.clone().unwrap_or_default();
        lock(&self.ring).dump(&version)
    }

    /// Validate a serialized log and start replaying it against a fresh
    /// connection from `factory`.
    pub fn load_replay(
        &self,
        text: &str,
        factory: &dyn ConnectionFactory,
        options: PlayerOptions,
        observer: Arc<dyn PlaybackObserver>,
    ) -> Result<PlayerHandle, LoadError> {
        Player::load(text, factory, options, observer)
    }
}

impl Drop for TapeDeck {
    fn drop(&mut self) {
        self.detach();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn pump_events(
    mut packets: broadcast::Receiver<PacketEvent>,
    recorder: Arc<Mutex<Recorder>>,
    ring: Arc<Mutex<RingCapture>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            res = packets.recv() => match res {
                Ok(event) => {
                    lock(&ring).push(RingEntry {
                        name: event.name.clone(),
                        state: event.state,
                        payload: event.payload.clone(),
                        from_server: event.direction == crate::types::Direction::FromServer,
                        timestamp_ms: now_ms(),
                    });
                    lock(&recorder).record_packet(
                        event.direction,
                        &event.name,
                        event.state,
                        event.payload,
                    );
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "capture pump lagged behind the connection");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.wait_for(|v| *v) => break,
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
