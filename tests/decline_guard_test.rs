mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{TimeDelta, Utc};

use common::{BusRecorder, harness, settle};
use peercall::types::call::{CallId, CallMediaType, EndCallReason, PeerId};
use peercall::types::events::{EventKind, EventSource, RawEvent};
use peercall::{Coordinator, CoordinatorConfig};

fn invite_event(peer: &str, call_id: &str, with_payload: bool) -> RawEvent {
    let mut event = RawEvent::new(
        EventKind::InviteReceived {
            peer_name: peer.to_string(),
            media_kind: CallMediaType::Audio,
        },
        PeerId::from(peer),
        EventSource::Transport,
    )
    .with_call_id(CallId::new(call_id));
    if with_payload {
        event = event.with_payload(Bytes::from_static(b"remote-offer"));
    }
    event
}

/// Injecting the same decline N times produces exactly one cancel and one
/// dismiss.
#[tokio::test]
async fn repeated_decline_sends_one_cancel() {
    let h = harness();
    let handle = Coordinator::spawn(CoordinatorConfig::default(), h.sinks.clone());
    let recorder = Arc::new(BusRecorder::default());
    handle.events().add_handler(recorder.clone());

    handle.inject(invite_event("alice", "C1", true)).await.unwrap();
    assert!(h.log.wait_until(|l| l.contains("start_ringing")).await);

    // Duplicate deliveries of one physical decline carry the same
    // original timestamp.
    let decline = RawEvent::new(
        EventKind::DeclineIntent,
        PeerId::from("alice"),
        EventSource::Wake,
    );
    for _ in 0..3 {
        handle.inject(decline.clone()).await.unwrap();
    }

    assert!(h.log.wait_until(|l| l.contains("send_cancel:alice:Declined")).await);
    settle().await;
    assert_eq!(h.log.count("send_cancel"), 1);
    assert_eq!(h.log.count("dismiss"), 1);
    assert_eq!(recorder.ended_reasons(), vec![EndCallReason::Declined]);
}

/// A decline can never be undone by a delayed answer-shaped signal from
/// another channel.
#[tokio::test]
async fn decline_beats_delayed_wake_answer() {
    let h = harness();
    let handle = Coordinator::spawn(CoordinatorConfig::default(), h.sinks.clone());
    let recorder = Arc::new(BusRecorder::default());
    handle.events().add_handler(recorder.clone());

    let issued_at = Utc::now();
    handle
        .inject(invite_event("alice", "C1", false).with_source_ts(issued_at))
        .await
        .unwrap();
    assert!(h.log.wait_until(|l| l.contains("start_ringing")).await);

    handle
        .inject(
            RawEvent::new(
                EventKind::DeclineIntent,
                PeerId::from("alice"),
                EventSource::LocalBus,
            )
            .with_source_ts(issued_at),
        )
        .await
        .unwrap();
    assert!(h.log.wait_until(|l| l.contains("dismiss")).await);

    // The wake path catches up late with the answer the user never meant.
    handle
        .inject(
            RawEvent::new(
                EventKind::WakeAnswerIntent,
                PeerId::from("alice"),
                EventSource::Wake,
            )
            .with_source_ts(issued_at),
        )
        .await
        .unwrap();
    handle
        .inject(
            RawEvent::new(
                EventKind::RemoteSignal,
                PeerId::from("alice"),
                EventSource::Transport,
            )
            .with_source_ts(issued_at)
            .with_payload(Bytes::from_static(b"remote-offer")),
        )
        .await
        .unwrap();
    settle().await;

    assert!(!h.log.contains("present_connecting"));
    assert!(!h.log.contains("present_connected"));
    assert!(!h.log.contains("send_accept"));
    assert_eq!(recorder.ended_reasons(), vec![EndCallReason::Declined]);
}

/// The full scenario: decline fences duplicates of the same attempt, the
/// fence expires, and a genuinely new invite is admitted.
#[tokio::test]
async fn duplicate_fenced_then_fresh_invite_admitted_after_ttl() {
    let h = harness();
    let config = CoordinatorConfig {
        ledger_ttl: Duration::from_millis(300),
        ..CoordinatorConfig::default()
    };
    let handle = Coordinator::spawn(config, h.sinks.clone());

    let original_ts = Utc::now();
    handle
        .inject(invite_event("alice", "C1", true).with_source_ts(original_ts))
        .await
        .unwrap();
    assert!(h.log.wait_until(|l| l.contains("start_ringing")).await);

    handle.decline(PeerId::from("alice")).await.unwrap();
    assert!(h.log.wait_until(|l| l.contains("dismiss")).await);

    // Duplicate wake delivery of the declined attempt, two ticks later.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle
        .inject(invite_event("alice", "C1", true).with_source_ts(original_ts))
        .await
        .unwrap();
    settle().await;
    assert_eq!(h.log.count("start_ringing"), 1);
    assert_eq!(h.log.count("present_incoming:alice"), 1);

    // After the TTL, a distinct attempt starts a fresh ring.
    tokio::time::sleep(Duration::from_millis(400)).await;
    handle
        .inject(invite_event("alice", "C2", true).with_source_ts(Utc::now()))
        .await
        .unwrap();
    assert!(h.log.wait_until(|l| l.count("start_ringing") == 2).await);
    assert_eq!(h.log.count("present_incoming:alice"), 2);
}

/// A new invite whose source timestamp postdates the finalization is
/// admitted even while the fence is still warm.
#[tokio::test]
async fn fresh_invite_inside_ttl_is_admitted() {
    let h = harness();
    let handle = Coordinator::spawn(CoordinatorConfig::default(), h.sinks.clone());

    handle
        .inject(invite_event("alice", "C1", true).with_source_ts(Utc::now() - TimeDelta::seconds(1)))
        .await
        .unwrap();
    assert!(h.log.wait_until(|l| l.contains("start_ringing")).await);

    handle.decline(PeerId::from("alice")).await.unwrap();
    assert!(h.log.wait_until(|l| l.contains("dismiss")).await);

    // Well inside the 15s default TTL, but a genuinely new call.
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle
        .inject(invite_event("alice", "C2", true).with_source_ts(Utc::now()))
        .await
        .unwrap();
    assert!(h.log.wait_until(|l| l.count("start_ringing") == 2).await);
}

/// Cancel guard on the caller side: a late accept cannot resurrect a
/// canceled outgoing call.
#[tokio::test]
async fn local_cancel_beats_late_remote_accept() {
    let h = harness();
    let handle = Coordinator::spawn(CoordinatorConfig::default(), h.sinks.clone());
    let recorder = Arc::new(BusRecorder::default());
    handle.events().add_handler(recorder.clone());

    let bob = PeerId::from("bob");
    let call_id = handle
        .start_call(bob.clone(), CallMediaType::Audio)
        .await
        .unwrap();
    assert!(h.log.wait_until(|l| l.contains("present_outgoing:bob")).await);

    let before_cancel = Utc::now();
    handle.cancel(bob.clone()).await.unwrap();
    assert!(h.log.wait_until(|l| l.contains("send_cancel:bob:UserEnded")).await);

    handle
        .inject(
            RawEvent::new(EventKind::RemoteSignal, bob.clone(), EventSource::Transport)
                .with_call_id(call_id)
                .with_source_ts(before_cancel)
                .with_payload(Bytes::from_static(b"remote-answer")),
        )
        .await
        .unwrap();
    settle().await;

    assert!(!h.log.contains("present_connecting"));
    assert!(!h.log.contains("apply_description"));
    assert_eq!(recorder.ended_reasons(), vec![EndCallReason::UserEnded]);
}
