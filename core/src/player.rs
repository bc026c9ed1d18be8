//! Replay player
//!
//! Walks a parsed session log chronologically against a fresh live
//! connection. Server-originated packets are written at speed-scaled
//! recorded intervals; client-originated packets are never written from the
//! log — the live client is the source of truth for its own traffic, so the
//! player batches their names and blocks on the packet waiter until the
//! client reproduces them (or an optional timeout elapses).
//!
//! Phases: `LOADING → PLAYING ⇄ PAUSED → FINISHED`, with `ABORTED` reachable
//! from anywhere via teardown or a fault while stop-on-error is set. All
//! suspension points (pacing sleep, waiter block, pause poll) unblock
//! immediately on teardown.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::codec;
use crate::connection::{ConnectionFactory, Fault, LiveConnection, PacketEvent};
use crate::error::{LoadError, WaiterError};
use crate::types::{Direction, PacketEntry, ReplayTarget, SessionLog};
use crate::waiter::{PacketWaiter, WaitOutcome, WaiterConfig, WaiterObserver};

/// Poll interval while paused. Pause takes effect between entries only.
pub const PAUSE_POLL_INTERVAL_MS: u64 = 100;

/// Deadline for a client packet batch when skip-on-timeout is enabled.
pub const CLIENT_BATCH_TIMEOUT_MS: u64 = 1000;

/// Playback configuration.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    /// Pacing multiplier applied to recorded inter-packet delays.
    /// 0.5 halves every delay (double speed).
    pub speed: f64,
    /// Constant extra delay added after every paced server packet; slows
    /// down fast recordings for easier observation.
    pub extra_delay_ms: u64,
    /// Advance past a client batch after [`CLIENT_BATCH_TIMEOUT_MS`] instead
    /// of stalling on packets the live client never reproduces. Off by
    /// default: an output-less client stalling playback indefinitely is the
    /// correct behavior for a deterministic replay.
    pub skip_missing_on_timeout: bool,
    /// Abort playback on the next live connection fault.
    pub stop_on_error: bool,
    /// Unexpected-packet reporting cap handed to the packet waiter.
    pub unexpected_limit: usize,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            extra_delay_ms: 0,
            skip_missing_on_timeout: false,
            stop_on_error: false,
            unexpected_limit: crate::waiter::DEFAULT_UNEXPECTED_LIMIT,
        }
    }
}

/// Playback state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Loading,
    Playing,
    Paused,
    Finished,
    Aborted,
}

impl PlaybackPhase {
    /// Terminal phases end the playback task.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlaybackPhase::Finished | PlaybackPhase::Aborted)
    }
}

/// Playback position for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

/// Live-display callbacks raised by the playback task.
pub trait PlaybackObserver: Send + Sync {
    fn entry_processed(&self, _index: usize, _entry: &PacketEntry) {}
    fn phase_changed(&self, _phase: PlaybackPhase) {}
}

/// No-op observer.
pub struct SilentPlayback;

impl PlaybackObserver for SilentPlayback {}

/// State shared between the playback task and its handle.
#[derive(Debug)]
struct Shared {
    cursor: AtomicUsize,
    total: usize,
    paused: AtomicBool,
    speed_bits: AtomicU64,
    last_fault: Mutex<Option<String>>,
}

impl Shared {
    fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Relaxed))
    }

    fn set_fault(&self, message: String) {
        let mut slot = self
            .last_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(message);
    }
}

/// Control surface for a running replay, consumed by the presentation layer.
#[derive(Debug)]
pub struct PlayerHandle {
    shared: Arc<Shared>,
    phase_rx: watch::Receiver<PlaybackPhase>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl PlayerHandle {
    /// Request a pause; takes effect between entries, never mid-entry.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Relaxed);
    }

    /// Set the pacing multiplier, clamped to a sane range.
    pub fn set_speed(&self, speed: f64) {
        let speed = speed.clamp(0.1, 10.0);
        self.shared
            .speed_bits
            .store(speed.to_bits(), Ordering::Relaxed);
    }

    pub fn phase(&self) -> PlaybackPhase {
        *self.phase_rx.borrow()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            current: self.shared.cursor.load(Ordering::Relaxed),
            total: self.shared.total,
        }
    }

    /// Tear the playback down. Unblocks any pacing sleep, waiter block, or
    /// pause poll immediately; the task transitions to `ABORTED`.
    pub fn abort(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Last fault message surfaced by the live connection, verbatim.
    pub fn last_fault(&self) -> Option<String> {
        self.shared
            .last_fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for playback to reach a terminal phase.
    pub async fn wait_finished(&self) -> PlaybackPhase {
        let mut rx = self.phase_rx.clone();
        loop {
            let phase = *rx.borrow_and_update();
            if phase.is_terminal() {
                return phase;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow();
            }
        }
    }
}

/// Waiter classification logging; correlation detail stays on the
/// diagnostic channel rather than the playback view.
struct LogWaiterObserver;

impl WaiterObserver for LogWaiterObserver {
    fn expected_packet(&self, name: &str, _payload: &crate::codec::payload::PayloadValue) {
        tracing::trace!(packet = name, "client reproduced expected packet");
    }

    fn unexpected_packet(&self, name: &str, _payload: &crate::codec::payload::PayloadValue) {
        tracing::debug!(packet = name, "unexpected client packet during replay");
    }

    fn unexpected_limit_reached(&self) {
        tracing::debug!("unexpected packet reporting cap reached, counting silently");
    }
}

/// Entry point for replaying a serialized session log.
pub struct Player;

impl Player {
    /// Validate a log and start playback against a fresh live connection.
    ///
    /// Header validation happens before any connection attempt, so a
    /// rejected log never leaves a half-initialized session behind. Must be
    /// called from within a tokio runtime.
    pub fn load(
        text: &str,
        factory: &dyn ConnectionFactory,
        options: PlayerOptions,
        observer: Arc<dyn PlaybackObserver>,
    ) -> Result<PlayerHandle, LoadError> {
        let log = codec::parse(text)?;
        if log.header.replay_against == ReplayTarget::Server {
            return Err(LoadError::UnsupportedDirection);
        }

        let conn = factory.connect(&log.header.protocol_version)?;
        // Subscribe before spawning so no early event is missed.
        let packets = conn.subscribe_packets();
        let faults = conn.subscribe_faults();

        tracing::info!(
            protocol_version = %log.header.protocol_version,
            entries = log.entries.len(),
            "replay loaded"
        );

        let shared = Arc::new(Shared {
            cursor: AtomicUsize::new(0),
            total: log.entries.len(),
            paused: AtomicBool::new(false),
            speed_bits: AtomicU64::new(options.speed.clamp(0.1, 10.0).to_bits()),
            last_fault: Mutex::new(None),
        });
        let (phase_tx, phase_rx) = watch::channel(PlaybackPhase::Loading);
        let shutdown = Arc::new(watch::Sender::new(false));

        let task = PlaybackTask {
            log,
            conn,
            options,
            shared: shared.clone(),
            observer,
            phase: phase_tx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(task.run(packets, faults));

        Ok(PlayerHandle {
            shared,
            phase_rx,
            shutdown,
        })
    }
}

struct PlaybackTask {
    log: SessionLog,
    conn: Arc<dyn LiveConnection>,
    options: PlayerOptions,
    shared: Arc<Shared>,
    observer: Arc<dyn PlaybackObserver>,
    phase: watch::Sender<PlaybackPhase>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl PlaybackTask {
    async fn run(
        self,
        packets: broadcast::Receiver<PacketEvent>,
        faults: broadcast::Receiver<Fault>,
    ) {
        let waiter = Arc::new(PacketWaiter::new(
            WaiterConfig {
                unexpected_limit: self.options.unexpected_limit,
            },
            LogWaiterObserver,
        ));

        let pump = tokio::spawn(pump_packets(packets, waiter.clone(), self.shutdown.clone()));
        let fault_watch = tokio::spawn(watch_faults(
            faults,
            self.shared.clone(),
            self.options.stop_on_error,
            self.shutdown.clone(),
        ));

        let end = self.drive(&waiter).await;
        self.set_phase(end);
        tracing::info!(phase = ?end, "replay ended");

        // Stop the helper tasks and release their subscriptions.
        let _ = self.shutdown.send(true);
        let _ = pump.await;
        let _ = fault_watch.await;
    }

    /// Sequential walk over the log. Returns the terminal phase.
    async fn drive(&self, waiter: &PacketWaiter<LogWaiterObserver>) -> PlaybackPhase {
        self.set_phase(PlaybackPhase::Playing);
        let mut batch: Vec<String> = Vec::new();

        for (idx, entry) in self.log.entries.iter().enumerate() {
            if !self.pause_gate().await {
                return PlaybackPhase::Aborted;
            }

            match entry.direction {
                Direction::FromClient => {
                    // Custom channel writes are inert markers in the log.
                    if !entry.custom_channel {
                        batch.push(entry.name.clone());
                    }
                    self.mark_processed(idx, entry);
                }
                Direction::FromServer => {
                    // The batch closes when the timeline reaches a server
                    // packet; the live client must catch up first.
                    if !self.correlate(waiter, &mut batch).await {
                        return PlaybackPhase::Aborted;
                    }

                    if entry.payload.is_null() {
                        tracing::warn!(
                            packet = %entry.name,
                            sequence = entry.sequence,
                            "server entry has no payload, skipping"
                        );
                    } else if let Err(err) = self.conn.write(&entry.name, &entry.payload) {
                        self.shared.set_fault(err.to_string());
                        tracing::error!(packet = %entry.name, %err, "packet write failed");
                        if self.options.stop_on_error {
                            return PlaybackPhase::Aborted;
                        }
                    }
                    self.mark_processed(idx, entry);

                    // The delay runs after the write, holding back the rest
                    // of the log rather than this entry.
                    if let Some(diff) = entry.time_diff_ms {
                        if !self.pacing_sleep(diff).await {
                            return PlaybackPhase::Aborted;
                        }
                    }
                }
            }
        }

        // Trailing client packets at the end of the log.
        if !self.correlate(waiter, &mut batch).await {
            return PlaybackPhase::Aborted;
        }
        PlaybackPhase::Finished
    }

    /// Block while paused, polling at a fixed interval. Returns false on
    /// teardown.
    async fn pause_gate(&self) -> bool {
        if self.cancelled() {
            return false;
        }
        let mut was_paused = false;
        while self.shared.paused.load(Ordering::Relaxed) {
            if !was_paused {
                was_paused = true;
                self.set_phase(PlaybackPhase::Paused);
            }
            if !self
                .sleep_cancellable(Duration::from_millis(PAUSE_POLL_INTERVAL_MS))
                .await
            {
                return false;
            }
        }
        if was_paused {
            self.set_phase(PlaybackPhase::Playing);
        }
        true
    }

    /// Hand the accumulated client batch to the waiter and block until the
    /// live client reproduces it. Returns false on teardown.
    async fn correlate(
        &self,
        waiter: &PacketWaiter<LogWaiterObserver>,
        batch: &mut Vec<String>,
    ) -> bool {
        if batch.is_empty() {
            return true;
        }
        let names = std::mem::take(batch);
        tracing::debug!(count = names.len(), "waiting for client packet batch");

        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return false;
        }

        let wait = waiter.wait_for_packets(names);
        if self.options.skip_missing_on_timeout {
            let deadline = Duration::from_millis(CLIENT_BATCH_TIMEOUT_MS);
            tokio::select! {
                res = tokio::time::timeout(deadline, wait) => match res {
                    Ok(outcome) => self.batch_outcome(outcome),
                    Err(_) => {
                        tracing::debug!("client batch timed out, skipping missing packets");
                        waiter.stop_waiting();
                        true
                    }
                },
                _ = shutdown.wait_for(|v| *v) => {
                    waiter.stop_waiting();
                    false
                }
            }
        } else {
            tokio::select! {
                outcome = wait => self.batch_outcome(outcome),
                _ = shutdown.wait_for(|v| *v) => {
                    waiter.stop_waiting();
                    false
                }
            }
        }
    }

    fn batch_outcome(&self, outcome: Result<WaitOutcome, WaiterError>) -> bool {
        match outcome {
            Ok(WaitOutcome::Complete) => true,
            Ok(WaitOutcome::Cancelled) => false,
            Err(err @ WaiterError::AlreadyWaiting) => {
                // Player bug, not a runtime condition; surface and stop.
                self.shared.set_fault(err.to_string());
                tracing::error!(%err, "packet waiter misuse");
                false
            }
        }
    }

    /// Speed-scaled inter-packet pacing. Returns false on teardown.
    async fn pacing_sleep(&self, diff_ms: u64) -> bool {
        let scaled = (diff_ms as f64 * self.shared.speed()) as u64;
        let delay = scaled + self.options.extra_delay_ms;
        if delay == 0 {
            return true;
        }
        self.sleep_cancellable(Duration::from_millis(delay)).await
    }

    async fn sleep_cancellable(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.wait_for(|v| *v) => false,
        }
    }

    fn cancelled(&self) -> bool {
        *self.shutdown.subscribe().borrow()
    }

    fn mark_processed(&self, idx: usize, entry: &PacketEntry) {
        self.shared.cursor.store(idx + 1, Ordering::Relaxed);
        self.observer.entry_processed(idx, entry);
    }

    fn set_phase(&self, phase: PlaybackPhase) {
        let changed = *self.phase.borrow() != phase;
        if changed {
            self.phase.send_replace(phase);
            self.observer.phase_changed(phase);
        }
    }
}

/// Feed the live client's outgoing packets into the waiter.
///
/// The waiter buffers when no wait is active, so no packet is dropped for
/// lack of a waiter.
async fn pump_packets(
    mut packets: broadcast::Receiver<PacketEvent>,
    waiter: Arc<PacketWaiter<LogWaiterObserver>>,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            res = packets.recv() => match res {
                Ok(event) => {
                    if event.direction == Direction::FromClient {
                        waiter.add_packet(&event.name, event.payload);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "packet pump lagged behind the connection");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_rx.wait_for(|v| *v) => break,
        }
    }
}

/// Funnel the connection's error-level diagnostics into one decision point.
async fn watch_faults(
    mut faults: broadcast::Receiver<Fault>,
    shared: Arc<Shared>,
    stop_on_error: bool,
    shutdown: Arc<watch::Sender<bool>>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            res = faults.recv() => match res {
                Ok(fault) => {
                    tracing::error!(message = %fault.message, "live connection fault");
                    shared.set_fault(fault.message);
                    if stop_on_error {
                        let _ = shutdown.send(true);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown_rx.wait_for(|v| *v) => break,
        }
    }
}
