//! Shared test doubles: recording sinks and a bus recorder.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use peercall::effects::Sinks;
use peercall::handoff::RedbHandoffStore;
use peercall::sinks::{MediaController, PresentationSink, RingerSink, SignalSender};
use peercall::types::call::{CallId, CallMediaType, CallRole, EndCallReason, PeerId};
use peercall::types::events::{CallEvent, CallEventHandler};

/// Ordered log of every sink call, as compact labels.
#[derive(Clone, Default)]
pub struct SinkLog(Arc<Mutex<Vec<String>>>);

impl SinkLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn contains(&self, prefix: &str) -> bool {
        self.count(prefix) > 0
    }

    /// Poll until the predicate holds or the timeout expires.
    pub async fn wait_until<F: Fn(&SinkLog) -> bool>(&self, pred: F) -> bool {
        for _ in 0..200 {
            if pred(self) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

struct LogPresentation(SinkLog);

#[async_trait]
impl PresentationSink for LogPresentation {
    async fn present_outgoing(
        &self,
        peer: &PeerId,
        _media_kind: CallMediaType,
    ) -> anyhow::Result<()> {
        self.0.push(format!("present_outgoing:{peer}"));
        Ok(())
    }

    async fn present_incoming(
        &self,
        peer: &PeerId,
        _peer_name: &str,
        _media_kind: CallMediaType,
    ) -> anyhow::Result<()> {
        self.0.push(format!("present_incoming:{peer}"));
        Ok(())
    }

    async fn present_connecting(&self, peer: &PeerId) -> anyhow::Result<()> {
        self.0.push(format!("present_connecting:{peer}"));
        Ok(())
    }

    async fn present_connected(&self, peer: &PeerId) -> anyhow::Result<()> {
        self.0.push(format!("present_connected:{peer}"));
        Ok(())
    }

    async fn dismiss(&self) -> anyhow::Result<()> {
        self.0.push("dismiss".into());
        Ok(())
    }
}

struct LogRinger(SinkLog);

#[async_trait]
impl RingerSink for LogRinger {
    async fn start_ringing(&self) -> anyhow::Result<()> {
        self.0.push("start_ringing".into());
        Ok(())
    }

    async fn stop_ringing(&self) -> anyhow::Result<()> {
        self.0.push("stop_ringing".into());
        Ok(())
    }
}

struct LogSignals(SinkLog);

#[async_trait]
impl SignalSender for LogSignals {
    async fn send_invite(
        &self,
        peer: &PeerId,
        call_id: &CallId,
        _media_kind: CallMediaType,
        _description: Option<&Bytes>,
    ) -> anyhow::Result<()> {
        self.0.push(format!("send_invite:{peer}:{call_id}"));
        Ok(())
    }

    async fn send_accept(
        &self,
        peer: &PeerId,
        call_id: &CallId,
        _description: Option<&Bytes>,
    ) -> anyhow::Result<()> {
        self.0.push(format!("send_accept:{peer}:{call_id}"));
        Ok(())
    }

    async fn send_cancel(
        &self,
        peer: &PeerId,
        _call_id: Option<&CallId>,
        reason: EndCallReason,
    ) -> anyhow::Result<()> {
        self.0.push(format!("send_cancel:{peer}:{reason:?}"));
        Ok(())
    }
}

struct LogMedia(SinkLog);

#[async_trait]
impl MediaController for LogMedia {
    async fn start_signaling(&self, role: CallRole, peer: &PeerId) -> anyhow::Result<()> {
        self.0.push(format!("start_media:{peer}:{role:?}"));
        Ok(())
    }

    async fn apply_remote_description(
        &self,
        peer: &PeerId,
        _description: Bytes,
    ) -> anyhow::Result<()> {
        self.0.push(format!("apply_description:{peer}"));
        Ok(())
    }

    async fn add_remote_candidate(&self, peer: &PeerId, _candidate: Bytes) -> anyhow::Result<()> {
        self.0.push(format!("add_candidate:{peer}"));
        Ok(())
    }

    async fn release(&self, peer: &PeerId) -> anyhow::Result<()> {
        self.0.push(format!("release_media:{peer}"));
        Ok(())
    }
}

/// Recording subscriber for bus events.
#[derive(Default)]
pub struct BusRecorder(Mutex<Vec<CallEvent>>);

impl BusRecorder {
    pub fn events(&self) -> Vec<CallEvent> {
        self.0.lock().unwrap().clone()
    }

    pub fn ended_reasons(&self) -> Vec<EndCallReason> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                CallEvent::CallEnded { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }
}

impl CallEventHandler for BusRecorder {
    fn handle_event(&self, event: &CallEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

pub struct TestHarness {
    pub log: SinkLog,
    pub sinks: Sinks,
    pub handoff: Arc<RedbHandoffStore>,
}

pub fn harness() -> TestHarness {
    let _ = env_logger::builder().is_test(true).try_init();

    let log = SinkLog::default();
    let handoff = Arc::new(RedbHandoffStore::in_memory().expect("in-memory store"));
    let sinks = Sinks {
        presentation: Arc::new(LogPresentation(log.clone())),
        ringer: Arc::new(LogRinger(log.clone())),
        signals: Arc::new(LogSignals(log.clone())),
        media: Arc::new(LogMedia(log.clone())),
        handoff: handoff.clone(),
    };
    TestHarness { log, sinks, handoff }
}

/// Give the worker and dispatcher a moment to drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}
