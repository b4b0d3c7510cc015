mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};

use common::{BusRecorder, harness, settle};
use peercall::handoff::{HandoffIntent, HandoffRecord, HandoffStore};
use peercall::sources::handoff::HandoffPoller;
use peercall::types::call::{CallMediaType, EndCallReason, PeerId};
use peercall::{Coordinator, CoordinatorConfig};

/// A ring parked by the native layer before a process restart resumes
/// when the poller finds it.
#[tokio::test]
async fn parked_call_resumes_ringing_after_cold_start() {
    let h = harness();
    let alice = PeerId::from("alice");
    h.handoff
        .put(HandoffRecord::pending_call(
            alice.clone(),
            "Alice".into(),
            CallMediaType::Video,
        ))
        .await
        .unwrap();

    let handle = Coordinator::spawn(CoordinatorConfig::default(), h.sinks.clone());
    let recorder = Arc::new(BusRecorder::default());
    handle.events().add_handler(recorder.clone());

    HandoffPoller::spawn(
        h.handoff.clone(),
        handle.sender(),
        Duration::from_millis(50),
        3,
    );

    assert!(
        h.log
            .wait_until(|l| l.contains("present_incoming:alice") && l.contains("start_ringing"))
            .await
    );
    settle().await;
    // Repeated scans of the same record do not re-ring.
    assert_eq!(h.log.count("start_ringing"), 1);
}

/// A decline taken on the wake UI while the process was down is replayed
/// and the cancel goes out.
#[tokio::test]
async fn parked_cancel_is_replayed_and_record_cleared() {
    let h = harness();
    let alice = PeerId::from("alice");
    h.handoff
        .put(HandoffRecord::pending_cancel(alice.clone()))
        .await
        .unwrap();

    let handle = Coordinator::spawn(CoordinatorConfig::default(), h.sinks.clone());
    let recorder = Arc::new(BusRecorder::default());
    handle.events().add_handler(recorder.clone());

    HandoffPoller::spawn(
        h.handoff.clone(),
        handle.sender(),
        Duration::from_millis(50),
        2,
    );

    assert!(
        h.log
            .wait_until(|l| l.contains("send_cancel:alice:Declined"))
            .await
    );
    assert_eq!(recorder.ended_reasons(), vec![EndCallReason::Declined]);

    // The coordinator clears the record once consumed.
    for _ in 0..50 {
        if h.handoff.get(&alice).await.unwrap().is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(h.handoff.get(&alice).await.unwrap().is_none());
}

/// Stale store contents from an attempt the coordinator already
/// finalized stay fenced.
#[tokio::test]
async fn stale_record_is_fenced() {
    let h = harness();
    let alice = PeerId::from("alice");

    let handle = Coordinator::spawn(CoordinatorConfig::default(), h.sinks.clone());

    // Ring and decline a call normally.
    let issued_at = Utc::now() - TimeDelta::seconds(2);
    handle
        .inject(
            peercall::RawEvent::new(
                peercall::EventKind::InviteReceived {
                    peer_name: "Alice".into(),
                    media_kind: CallMediaType::Audio,
                },
                alice.clone(),
                peercall::types::events::EventSource::Wake,
            )
            .with_source_ts(issued_at),
        )
        .await
        .unwrap();
    assert!(h.log.wait_until(|l| l.contains("start_ringing")).await);
    handle.decline(alice.clone()).await.unwrap();
    assert!(h.log.wait_until(|l| l.contains("dismiss")).await);

    // A leftover record describing the same (pre-finalization) attempt.
    h.handoff
        .put(HandoffRecord {
            peer_id: alice.clone(),
            peer_name: "Alice".into(),
            media_kind: CallMediaType::Audio,
            intent: HandoffIntent::PendingCall,
            created_at: issued_at,
        })
        .await
        .unwrap();

    HandoffPoller::spawn(
        h.handoff.clone(),
        handle.sender(),
        Duration::from_millis(50),
        2,
    );
    settle().await;
    settle().await;

    assert_eq!(h.log.count("start_ringing"), 1);
    assert_eq!(h.log.count("present_incoming:alice"), 1);
}
