//! Shared test harness: an in-memory live connection, a spying connection
//! factory, and session log builders.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use tokio::sync::broadcast;

use tapedeck_core::{
    codec, ConnectionError, ConnectionFactory, Direction, Fault, LiveConnection, PacketEntry,
    PacketEvent, PayloadValue, PlaybackObserver, PlaybackPhase, ProtocolState, SessionLog,
};

/// Route crate logs through the test harness, honoring `RUST_LOG`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .init();
    });
}

/// In-memory stand-in for a live protocol connection.
pub struct FakeConnection {
    version: String,
    packets: broadcast::Sender<PacketEvent>,
    faults: broadcast::Sender<Fault>,
    written: Mutex<Vec<(String, PayloadValue)>>,
}

impl FakeConnection {
    pub fn new(version: &str) -> Arc<Self> {
        init_tracing();
        let (packets, _) = broadcast::channel(256);
        let (faults, _) = broadcast::channel(64);
        Arc::new(Self {
            version: version.to_string(),
            packets,
            faults,
            written: Mutex::new(Vec::new()),
        })
    }

    /// Simulate a packet observed on the connection.
    pub fn inject(&self, direction: Direction, name: &str, payload: PayloadValue) {
        let _ = self.packets.send(PacketEvent {
            direction,
            name: name.to_string(),
            state: ProtocolState::Play,
            payload,
        });
    }

    /// Simulate the live client sending a packet of its own.
    pub fn inject_client(&self, name: &str) {
        self.inject(Direction::FromClient, name, PayloadValue::Null);
    }

    /// Simulate an error-level diagnostic from the connection.
    pub fn inject_fault(&self, message: &str) {
        let _ = self.faults.send(Fault {
            message: message.to_string(),
        });
    }

    /// Names and payloads written outward so far.
    pub fn written(&self) -> Vec<(String, PayloadValue)> {
        self.written.lock().unwrap().clone()
    }

    pub fn written_names(&self) -> Vec<String> {
        self.written()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }
}

impl LiveConnection for FakeConnection {
    fn protocol_version(&self) -> String {
        self.version.clone()
    }

    fn write(&self, name: &str, payload: &PayloadValue) -> Result<(), ConnectionError> {
        self.written
            .lock()
            .unwrap()
            .push((name.to_string(), payload.clone()));
        Ok(())
    }

    fn subscribe_packets(&self) -> broadcast::Receiver<PacketEvent> {
        self.packets.subscribe()
    }

    fn subscribe_faults(&self) -> broadcast::Receiver<Fault> {
        self.faults.subscribe()
    }
}

/// Connection factory that counts its calls and hands out one fake.
pub struct SpyFactory {
    conn: Arc<FakeConnection>,
    calls: AtomicUsize,
}

impl SpyFactory {
    pub fn new(conn: Arc<FakeConnection>) -> Self {
        Self {
            conn,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl ConnectionFactory for SpyFactory {
    fn connect(&self, _protocol_version: &str) -> Result<Arc<dyn LiveConnection>, ConnectionError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.conn.clone())
    }
}

/// Observer collecting processed entries and phase transitions.
#[derive(Default)]
pub struct CollectingObserver {
    pub entries: Mutex<Vec<(usize, String, tokio::time::Instant)>>,
    pub phases: Mutex<Vec<PlaybackPhase>>,
}

impl CollectingObserver {
    pub fn processed(&self) -> Vec<(usize, String)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(idx, name, _)| (*idx, name.clone()))
            .collect()
    }

    pub fn processed_at(&self) -> Vec<tokio::time::Instant> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, at)| *at)
            .collect()
    }

    pub fn phases(&self) -> Vec<PlaybackPhase> {
        self.phases.lock().unwrap().clone()
    }
}

impl PlaybackObserver for CollectingObserver {
    fn entry_processed(&self, index: usize, entry: &PacketEntry) {
        self.entries
            .lock()
            .unwrap()
            .push((index, entry.name.clone(), tokio::time::Instant::now()));
    }

    fn phase_changed(&self, phase: PlaybackPhase) {
        self.phases.lock().unwrap().push(phase);
    }
}

/// Server-originated log entry.
pub fn server_entry(
    name: &str,
    sequence: u64,
    time_diff_ms: Option<u64>,
    payload: PayloadValue,
) -> PacketEntry {
    PacketEntry {
        name: name.to_string(),
        state: ProtocolState::Play,
        direction: Direction::FromServer,
        payload,
        sequence,
        timestamp_ms: 1_700_000_000_000 + sequence,
        time_diff_ms,
        custom_channel: false,
    }
}

/// Client-originated log entry.
pub fn client_entry(name: &str, sequence: u64) -> PacketEntry {
    PacketEntry {
        name: name.to_string(),
        state: ProtocolState::Play,
        direction: Direction::FromClient,
        payload: PayloadValue::Null,
        sequence,
        timestamp_ms: 1_700_000_000_000 + sequence,
        time_diff_ms: None,
        custom_channel: false,
    }
}

/// Serialize a log with the given entries for protocol version 1.21.4.
pub fn log_text(entries: Vec<PacketEntry>) -> String {
    let mut log = SessionLog::new("1.21.4");
    log.entries = entries;
    codec::serialize(&log)
}

/// Yield until `predicate` holds, with a bounded number of scheduler turns.
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached within bounded scheduler turns");
}
