//! Handoff-store poller.
//!
//! After a cold start, call intent parked by the native layer may be
//! sitting in the durable store. This poller scans it a bounded number
//! of times at a fixed interval (the native side may still be writing
//! while we start up), enqueues what it finds, then stops. Records are
//! possibly stale; the coordinator re-validates everything against the
//! fencing ledger before trusting it, and clears records once consumed.

use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::handoff::{HandoffIntent, HandoffRecord, HandoffStore};
use crate::types::events::{EventKind, EventSource, RawEvent};

pub struct HandoffPoller;

impl HandoffPoller {
    pub fn spawn(
        store: Arc<dyn HandoffStore>,
        tx: mpsc::Sender<RawEvent>,
        interval: Duration,
        attempts: u32,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            for scan in 0..attempts {
                match store.all().await {
                    Ok(records) => {
                        for record in records {
                            for event in Self::normalize(record) {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => warn!("handoff scan {scan} failed: {e}"),
                }
                tokio::time::sleep(interval).await;
            }
            debug!("handoff poller done");
        })
    }

    fn normalize(record: HandoffRecord) -> Vec<RawEvent> {
        match record.intent {
            HandoffIntent::PendingCall => vec![
                RawEvent::new(
                    EventKind::InviteReceived {
                        peer_name: record.peer_name,
                        media_kind: record.media_kind,
                    },
                    record.peer_id,
                    EventSource::Handoff,
                )
                .with_source_ts(record.created_at),
            ],
            HandoffIntent::PendingCancel => vec![
                RawEvent::new(
                    EventKind::InviteReceived {
                        peer_name: record.peer_name,
                        media_kind: record.media_kind,
                    },
                    record.peer_id.clone(),
                    EventSource::Handoff,
                )
                .with_source_ts(record.created_at),
                RawEvent::new(
                    EventKind::DeclineIntent,
                    record.peer_id,
                    EventSource::Handoff,
                )
                .with_source_ts(record.created_at),
            ],
        }
    }
}
