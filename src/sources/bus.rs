//! Local-bus subscriber.
//!
//! Once the process is alive, UI surfaces publish user intents
//! in-process. This adapter drains them into the coordinator queue so
//! the socket path, wake path and UI path all converge on the same
//! serialized arbiter instead of racing each other to trigger
//! transitions directly.

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::types::call::PeerId;
use crate::types::events::{EventKind, EventSource, RawEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiIntentKind {
    Answer,
    Decline,
    Cancel,
    Hangup,
}

#[derive(Debug, Clone)]
pub struct UiIntent {
    pub peer: PeerId,
    pub kind: UiIntentKind,
}

pub struct BusSource;

impl BusSource {
    pub fn spawn(mut rx: mpsc::Receiver<UiIntent>, tx: mpsc::Sender<RawEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(intent) = rx.recv().await {
                let kind = match intent.kind {
                    UiIntentKind::Answer => EventKind::AnswerIntent,
                    UiIntentKind::Decline => EventKind::DeclineIntent,
                    UiIntentKind::Cancel | UiIntentKind::Hangup => EventKind::CancelIntent,
                };
                debug!("ui intent {:?} for {}", intent.kind, intent.peer);
                let event = RawEvent::new(kind, intent.peer, EventSource::LocalBus);
                if tx.send(event).await.is_err() {
                    warn!("coordinator queue closed; bus adapter stopping");
                    return;
                }
            }
            debug!("ui intent stream ended");
        })
    }
}
