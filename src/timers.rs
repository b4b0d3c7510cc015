//! Per-fingerprint timers.
//!
//! Timers never touch coordinator state: each one is a task that sleeps
//! and enqueues an event into the same serialized queue every other
//! source feeds. A timer that fires after its session finalized is
//! neutralized by the fence/identity checks like any other stale event,
//! but the coordinator still cancels eagerly on terminal transitions so
//! a recycled fingerprint can never meet a leftover timer.

use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::call::CallFingerprint;
use crate::types::events::{EventKind, EventSource, RawEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Auto-declines a ring nobody answers.
    RingTimeout,
    /// Abandons a connect that never completes.
    ConnectFailsafe,
    /// Bounded wait for the wake path's signaling payload: "wait for a
    /// value to appear", not "wait for an external confirmation".
    WakeSignalWait,
}

pub struct TimerService {
    tx: mpsc::Sender<RawEvent>,
    tasks: HashMap<(CallFingerprint, TimerKind), JoinHandle<()>>,
}

impl TimerService {
    pub fn new(tx: mpsc::Sender<RawEvent>) -> Self {
        Self {
            tx,
            tasks: HashMap::new(),
        }
    }

    /// Arm a one-shot ring timeout.
    pub fn schedule_ring_timeout(&mut self, fingerprint: &CallFingerprint, delay: Duration) {
        self.schedule_one_shot(fingerprint, TimerKind::RingTimeout, delay);
    }

    /// Arm a one-shot connect failsafe.
    pub fn schedule_connect_failsafe(&mut self, fingerprint: &CallFingerprint, delay: Duration) {
        self.schedule_one_shot(fingerprint, TimerKind::ConnectFailsafe, delay);
    }

    /// Arm the wake-signal wait: `attempts` polls at a fixed interval.
    /// The coordinator counts the ticks and decides when the wait is
    /// exhausted.
    pub fn schedule_wake_signal_wait(
        &mut self,
        fingerprint: &CallFingerprint,
        interval: Duration,
        attempts: u32,
    ) {
        let key = (fingerprint.clone(), TimerKind::WakeSignalWait);
        self.abort_existing(&key);

        let tx = self.tx.clone();
        let peer = fingerprint.peer.clone();
        let handle = tokio::spawn(async move {
            for _ in 0..attempts {
                tokio::time::sleep(interval).await;
                let event = RawEvent::new(EventKind::WakeSignalPoll, peer.clone(), EventSource::Timer);
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        self.tasks.insert(key, handle);
    }

    pub fn cancel(&mut self, fingerprint: &CallFingerprint, kind: TimerKind) {
        if let Some(handle) = self.tasks.remove(&(fingerprint.clone(), kind)) {
            handle.abort();
            debug!(target: "Coordinator/Timers", "canceled {kind:?} for {fingerprint}");
        }
    }

    /// Cancel every timer for this fingerprint. Called on terminal
    /// transitions, before the fingerprint can be recycled.
    pub fn cancel_all(&mut self, fingerprint: &CallFingerprint) {
        let keys: Vec<_> = self
            .tasks
            .keys()
            .filter(|(fp, _)| fp == fingerprint)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = self.tasks.remove(&key) {
                handle.abort();
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }

    fn schedule_one_shot(
        &mut self,
        fingerprint: &CallFingerprint,
        kind: TimerKind,
        delay: Duration,
    ) {
        let key = (fingerprint.clone(), kind);
        self.abort_existing(&key);

        let tx = self.tx.clone();
        let peer = fingerprint.peer.clone();
        let event_kind = match kind {
            TimerKind::RingTimeout => EventKind::RingTimeoutElapsed,
            TimerKind::ConnectFailsafe => EventKind::ConnectFailsafeElapsed,
            TimerKind::WakeSignalWait => EventKind::WakeSignalPoll,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let event = RawEvent::new(event_kind, peer, EventSource::Timer);
            let _ = tx.send(event).await;
        });
        self.tasks.insert(key, handle);
    }

    fn abort_existing(&mut self, key: &(CallFingerprint, TimerKind)) {
        if let Some(previous) = self.tasks.remove(key) {
            previous.abort();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
