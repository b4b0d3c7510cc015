//! The call coordinator: one worker task, four feeding channels, one
//! truth.
//!
//! All `ingest` calls are serialized through a single queue, so the
//! session store and fencing ledger need no locking and events for one
//! fingerprint are processed strictly in enqueue order. Source adapters
//! and timers only ever enqueue; sinks only ever receive effects.

mod engine;

pub use engine::CoordinatorEngine;

use log::{debug, info};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};

use crate::config::CoordinatorConfig;
use crate::effects::{EffectDispatcher, Sinks};
use crate::error::CallError;
use crate::timers::TimerService;
use crate::types::call::{CallId, CallMediaType, PeerId};
use crate::types::events::{EventBus, EventKind, EventSource, RawEvent};

pub struct Coordinator;

impl Coordinator {
    /// Spawn the worker and effect dispatcher; returns the handle
    /// everything else talks through.
    pub fn spawn(config: CoordinatorConfig, sinks: Sinks) -> CoordinatorHandle {
        let (event_tx, mut event_rx) = mpsc::channel::<RawEvent>(config.event_queue_depth);
        let (effect_tx, effect_rx) = mpsc::unbounded_channel();
        let bus = EventBus::new();
        let shutdown = Arc::new(Notify::new());

        let dispatcher = EffectDispatcher::new(effect_rx, sinks);
        tokio::spawn(dispatcher.run());

        let timers = TimerService::new(event_tx.clone());
        let mut engine = CoordinatorEngine::new(config, timers, effect_tx, bus.clone());

        let shutdown_rx = shutdown.clone();
        tokio::spawn(async move {
            info!("call coordinator started");
            loop {
                tokio::select! {
                    maybe_event = event_rx.recv() => {
                        match maybe_event {
                            Some(event) => engine.ingest(event),
                            None => break,
                        }
                    }
                    _ = shutdown_rx.notified() => {
                        debug!("shutdown signaled, stopping coordinator worker");
                        engine.shutdown();
                        break;
                    }
                }
            }
            info!("call coordinator stopped");
        });

        CoordinatorHandle {
            tx: event_tx,
            bus,
            shutdown,
        }
    }
}

/// Enqueue-only surface for UI code and source adapters. Cheap to clone.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<RawEvent>,
    bus: EventBus,
    shutdown: Arc<Notify>,
}

impl CoordinatorHandle {
    /// Start an outgoing call. The id is minted here so the caller can
    /// correlate transport traffic immediately.
    pub async fn start_call(
        &self,
        peer: PeerId,
        media_kind: CallMediaType,
    ) -> Result<CallId, CallError> {
        let call_id = CallId::generate();
        let event = RawEvent::new(
            EventKind::OutgoingCallIntent { media_kind },
            peer,
            EventSource::Local,
        )
        .with_call_id(call_id.clone());
        self.inject(event).await?;
        Ok(call_id)
    }

    pub async fn answer(&self, peer: PeerId) -> Result<(), CallError> {
        self.inject(RawEvent::new(
            EventKind::AnswerIntent,
            peer,
            EventSource::LocalBus,
        ))
        .await
    }

    pub async fn decline(&self, peer: PeerId) -> Result<(), CallError> {
        self.inject(RawEvent::new(
            EventKind::DeclineIntent,
            peer,
            EventSource::LocalBus,
        ))
        .await
    }

    /// Cancel an outgoing ring, or hang up a connected call; the
    /// coordinator resolves which from the live phase.
    pub async fn cancel(&self, peer: PeerId) -> Result<(), CallError> {
        self.inject(RawEvent::new(
            EventKind::CancelIntent,
            peer,
            EventSource::LocalBus,
        ))
        .await
    }

    pub async fn hangup(&self, peer: PeerId) -> Result<(), CallError> {
        self.cancel(peer).await
    }

    /// Enqueue a normalized event. Source adapters use this; UI code
    /// should prefer the intent methods above.
    pub async fn inject(&self, event: RawEvent) -> Result<(), CallError> {
        self.tx.send(event).await.map_err(|_| CallError::Closed)
    }

    /// Sender for adapters that enqueue from their own tasks.
    pub fn sender(&self) -> mpsc::Sender<RawEvent> {
        self.tx.clone()
    }

    /// The bus UI surfaces subscribe to.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
