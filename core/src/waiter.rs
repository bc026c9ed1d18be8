//! Packet waiter
//!
//! A reusable synchronization primitive that correlates live incoming
//! packets against an expected set of packet names. Packets that arrive
//! before a wait starts are buffered, so nothing is lost to timing between
//! the inbound stream and the player's sequential walk. Unexpected-packet
//! reporting is capped to keep diagnostic noise bounded on chatty
//! connections.

use std::pin::pin;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hashbrown::HashSet;
use tokio::sync::Notify;

use crate::codec::payload::PayloadValue;
use crate::error::WaiterError;

/// Default cap on individually reported unexpected packets per wait.
pub const DEFAULT_UNEXPECTED_LIMIT: usize = 10;

/// Waiter configuration.
#[derive(Debug, Clone)]
pub struct WaiterConfig {
    /// After this many individually reported unexpected packets,
    /// [`WaiterObserver::unexpected_limit_reached`] fires once and further
    /// unexpected packets are only counted.
    pub unexpected_limit: usize,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            unexpected_limit: DEFAULT_UNEXPECTED_LIMIT,
        }
    }
}

/// Classification callbacks. Every packet arriving during a wait triggers
/// exactly one of the first two methods, until the unexpected cap is hit.
pub trait WaiterObserver: Send + Sync {
    fn expected_packet(&self, _name: &str, _payload: &PayloadValue) {}
    fn unexpected_packet(&self, _name: &str, _payload: &PayloadValue) {}
    fn unexpected_limit_reached(&self) {}
}

/// No-op observer.
pub struct SilentObserver;

impl WaiterObserver for SilentObserver {}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every expected name was observed at least once.
    Complete,
    /// The wait was torn down via [`PacketWaiter::stop_waiting`].
    Cancelled,
}

/// State of the wait currently in progress.
struct ActiveWait {
    epoch: u64,
    pending: HashSet<String>,
    reported_unexpected: usize,
    total_unexpected: usize,
    limit_notified: bool,
}

struct WaiterState {
    /// Packets that arrived while no wait was active.
    buffered: Vec<(String, PayloadValue)>,
    wait: Option<ActiveWait>,
    /// Resolution record for the wait future to pick up.
    finished: Option<(u64, WaitOutcome)>,
    epoch: u64,
    last_unexpected: usize,
}

/// Classification result to deliver outside the state lock.
enum Classified {
    Expected(String, PayloadValue),
    Unexpected(String, PayloadValue),
    LimitReached,
}

/// Correlates arriving packets against an expected name set.
///
/// Owned exclusively by one replay player; one wait may be in progress at a
/// time.
pub struct PacketWaiter<O: WaiterObserver> {
    state: Mutex<WaiterState>,
    notify: Notify,
    observer: O,
    config: WaiterConfig,
}

impl<O: WaiterObserver> PacketWaiter<O> {
    pub fn new(config: WaiterConfig, observer: O) -> Self {
        Self {
            state: Mutex::new(WaiterState {
                buffered: Vec::new(),
                wait: None,
                finished: None,
                epoch: 0,
                last_unexpected: 0,
            }),
            notify: Notify::new(),
            observer,
            config,
        }
    }

    /// Feed a live packet in.
    ///
    /// Classified immediately when a wait is active; buffered otherwise, so
    /// a packet arriving slightly before `wait_for_packets` is not lost.
    pub fn add_packet(&self, name: &str, payload: PayloadValue) {
        let mut events = Vec::new();
        let mut completed = false;
        {
            let mut st = self.lock();
            if let Some(wait) = st.wait.as_mut() {
                classify(wait, self.config.unexpected_limit, name, payload, &mut events);
            } else {
                st.buffered.push((name.to_string(), payload));
                return;
            }
            let satisfied = st.wait.as_ref().is_some_and(|w| w.pending.is_empty());
            if satisfied {
                if let Some(wait) = st.wait.take() {
                    st.last_unexpected = wait.total_unexpected;
                    st.finished = Some((wait.epoch, WaitOutcome::Complete));
                    completed = true;
                }
            }
        }
        self.emit(events);
        if completed {
            self.notify.notify_waiters();
        }
    }

    /// Wait until every name in `names` has been observed at least once.
    ///
    /// Buffered packets are drained against the new expectation set first.
    /// Duplicates of an already-satisfied name are reported as unexpected.
    /// Fails fast with [`WaiterError::AlreadyWaiting`] if a previous wait on
    /// this instance is unresolved.
    pub async fn wait_for_packets<I, S>(&self, names: I) -> Result<WaitOutcome, WaiterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let epoch;
        let mut events = Vec::new();
        {
            let mut st = self.lock();
            if st.wait.is_some() {
                return Err(WaiterError::AlreadyWaiting);
            }
            st.epoch += 1;
            epoch = st.epoch;
            st.finished = None;

            let mut wait = ActiveWait {
                epoch,
                pending: names.into_iter().map(Into::into).collect(),
                reported_unexpected: 0,
                total_unexpected: 0,
                limit_notified: false,
            };
            for (name, payload) in std::mem::take(&mut st.buffered) {
                classify(
                    &mut wait,
                    self.config.unexpected_limit,
                    &name,
                    payload,
                    &mut events,
                );
            }
            if wait.pending.is_empty() {
                st.last_unexpected = wait.total_unexpected;
                st.finished = Some((epoch, WaitOutcome::Complete));
            } else {
                st.wait = Some(wait);
            }
        }
        self.emit(events);

        loop {
            let mut notified = pin!(self.notify.notified());
            // Register for wakeup before checking, so a notify between the
            // check and the await is not missed.
            notified.as_mut().enable();
            {
                let mut st = self.lock();
                match st.finished {
                    Some((e, outcome)) if e == epoch => {
                        st.finished = None;
                        return Ok(outcome);
                    }
                    _ => {
                        let ours = st.wait.as_ref().map(|w| w.epoch) == Some(epoch);
                        if !ours {
                            // Superseded without a resolution record.
                            return Ok(WaitOutcome::Cancelled);
                        }
                    }
                }
            }
            notified.await;
        }
    }

    /// Cancel any pending wait without resolving it; the waiter returns to
    /// buffering mode. Safe to call when idle.
    pub fn stop_waiting(&self) {
        let cancelled = {
            let mut st = self.lock();
            match st.wait.take() {
                Some(wait) => {
                    st.last_unexpected = wait.total_unexpected;
                    st.finished = Some((wait.epoch, WaitOutcome::Cancelled));
                    true
                }
                None => false,
            }
        };
        if cancelled {
            self.notify.notify_waiters();
        }
    }

    /// Unexpected packets seen by the current wait, or by the last one if
    /// none is active. Includes packets counted past the reporting cap.
    pub fn unexpected_count(&self) -> usize {
        let st = self.lock();
        st.wait
            .as_ref()
            .map_or(st.last_unexpected, |w| w.total_unexpected)
    }

    fn emit(&self, events: Vec<Classified>) {
        for event in events {
            match event {
                Classified::Expected(name, payload) => {
                    self.observer.expected_packet(&name, &payload);
                }
                Classified::Unexpected(name, payload) => {
                    self.observer.unexpected_packet(&name, &payload);
                }
                Classified::LimitReached => self.observer.unexpected_limit_reached(),
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, WaiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn classify(
    wait: &mut ActiveWait,
    limit: usize,
    name: &str,
    payload: PayloadValue,
    events: &mut Vec<Classified>,
) {
    if wait.pending.remove(name) {
        events.push(Classified::Expected(name.to_string(), payload));
    } else {
        wait.total_unexpected += 1;
        if wait.limit_notified {
            // Counted, not reported.
        } else if wait.reported_unexpected < limit {
            wait.reported_unexpected += 1;
            events.push(Classified::Unexpected(name.to_string(), payload));
        } else {
            wait.limit_notified = true;
            events.push(Classified::LimitReached);
        }
    }
}
