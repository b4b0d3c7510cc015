//! The coordinator's reducer: ingests normalized events, consults the
//! fencing ledger, mutates the session store and emits effects.
//!
//! Runs on the single worker task; nothing in here blocks or performs
//! I/O. Every decision follows the same path: fence check, identity
//! binding, guard check, transition, effect emission, terminal handling.

use log::{debug, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;

use crate::config::CoordinatorConfig;
use crate::effects::{CancelFlag, Effect, EffectEnvelope};
use crate::fencing::FencingLedger;
use crate::handoff::HandoffRecord;
use crate::session::{CallPhase, CallSession, CallTransition};
use crate::store::SessionStore;
use crate::timers::{TimerKind, TimerService};
use crate::types::call::{CallDirection, CallFingerprint, CallRole, EndCallReason, PeerId};
use crate::types::events::{
    BusyReason, CallEvent, ConnState, EventBus, EventKind, EventSource, RawEvent,
};

pub struct CoordinatorEngine {
    config: CoordinatorConfig,
    store: SessionStore,
    ledger: FencingLedger,
    timers: TimerService,
    effects_tx: mpsc::UnboundedSender<EffectEnvelope>,
    bus: EventBus,
    cancel_flags: HashMap<CallFingerprint, CancelFlag>,
}

impl CoordinatorEngine {
    pub fn new(
        config: CoordinatorConfig,
        timers: TimerService,
        effects_tx: mpsc::UnboundedSender<EffectEnvelope>,
        bus: EventBus,
    ) -> Self {
        let ledger = FencingLedger::new(config.ledger_ttl, config.ledger_capacity);
        Self {
            config,
            store: SessionStore::new(),
            ledger,
            timers,
            effects_tx,
            bus,
            cancel_flags: HashMap::new(),
        }
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Ingest one normalized event.
    pub fn ingest(&mut self, event: RawEvent) {
        // Step 1: fence check. Duplicates of finalized attempts die here,
        // which is what makes repeated wake deliveries safe.
        if self
            .ledger
            .is_fenced(&event.peer, event.call_id.as_ref(), event.source_ts)
        {
            return;
        }

        // Step 2: identity binding.
        if self.store.live(&event.peer).is_none() {
            if event.kind.can_originate() {
                self.originate(event);
            } else {
                debug!(
                    "no live call with {}; dropping {:?} from {:?}",
                    event.peer, event.kind, event.source
                );
            }
            return;
        }

        if let Some(call_id) = &event.call_id {
            let session = self.store.live_mut(&event.peer).expect("checked live above");
            if !session.adopt_call_id(call_id) {
                debug!(
                    "call id {call_id} does not match the live call with {}; dropping",
                    event.peer
                );
                return;
            }
        }

        // Step 3: guard check. Once a decline/cancel intent is in, only
        // terminal-driving events get through; a delayed answer-shaped
        // signal can no longer undo the decline.
        {
            let session = self.store.live(&event.peer).expect("checked live above");
            if session.is_guarded() && !event.kind.allowed_behind_guard() {
                debug!(
                    "call with {} is winding down; discarding {:?}",
                    event.peer, event.kind
                );
                return;
            }
        }

        // Steps 4-6: transition, effects, terminal handling.
        match event.kind.clone() {
            EventKind::InviteReceived { .. } => self.on_repeat_invite(event),
            EventKind::OutgoingCallIntent { .. } => {
                debug!("already calling {}; ignoring duplicate start", event.peer);
            }
            EventKind::AnswerIntent => self.on_answer_intent(event),
            EventKind::WakeAnswerIntent => self.on_wake_answer_intent(event),
            EventKind::DeclineIntent => self.on_decline_intent(event),
            EventKind::CancelIntent => self.on_cancel_intent(event),
            EventKind::RemoteSignal => self.on_remote_signal(event),
            EventKind::RemoteCandidate => self.on_remote_candidate(event),
            EventKind::TransportAck => self.on_transport_ack(event),
            EventKind::ConnectionStateChanged(state) => self.on_connection_state(event, state),
            EventKind::BusyOrOffline(reason) => self.on_busy_or_offline(event, reason),
            EventKind::RingTimeoutElapsed => self.on_ring_timeout(event),
            EventKind::ConnectFailsafeElapsed => self.on_connect_failsafe(event),
            EventKind::WakeSignalPoll => self.on_wake_signal_poll(event),
        }
    }

    /// Abort every timer and in-flight effect. Called on shutdown.
    pub fn shutdown(&mut self) {
        self.timers.shutdown();
        for flag in self.cancel_flags.values() {
            flag.trip();
        }
    }

    // ---- origination ----

    fn originate(&mut self, event: RawEvent) {
        match &event.kind {
            EventKind::InviteReceived {
                peer_name,
                media_kind,
            } => {
                if self.store.busy_with_other(&event.peer) {
                    debug!("busy with another call; rejecting invite from {}", event.peer);
                    self.emit_unscoped(
                        CallFingerprint::incoming(event.peer.clone()),
                        Effect::SendCancel {
                            peer: event.peer,
                            call_id: event.call_id,
                            reason: EndCallReason::Busy,
                        },
                    );
                    return;
                }

                let mut session = CallSession::new_incoming(
                    event.peer.clone(),
                    peer_name.clone(),
                    *media_kind,
                );
                if let Some(call_id) = &event.call_id {
                    session.adopt_call_id(call_id);
                }
                session.signal_payload = event.payload.clone();

                if let Err(e) = session.apply_transition(CallTransition::InviteAccepted) {
                    warn!("failed to start incoming call with {}: {e}", event.peer);
                    return;
                }

                let fingerprint = session.fingerprint.clone();
                self.cancel_flags
                    .insert(fingerprint.clone(), CancelFlag::new());
                self.timers
                    .schedule_ring_timeout(&fingerprint, self.config.ring_timeout);

                self.emit(
                    &fingerprint,
                    Effect::StoreHandoff {
                        record: HandoffRecord::pending_call(
                            event.peer.clone(),
                            session.peer_name.clone(),
                            session.media_kind,
                        ),
                    },
                );
                self.emit(&fingerprint, Effect::StartRinging);
                self.emit(
                    &fingerprint,
                    Effect::PresentIncoming {
                        peer: event.peer.clone(),
                        peer_name: session.peer_name.clone(),
                        media_kind: session.media_kind,
                    },
                );

                self.bus.dispatch(&CallEvent::IncomingCall {
                    peer: event.peer.clone(),
                    peer_name: session.peer_name.clone(),
                    media_kind: session.media_kind,
                    answered_via_wake: false,
                });

                self.store.mint(session);
            }
            EventKind::OutgoingCallIntent { media_kind } => {
                if self.store.busy_with_other(&event.peer) {
                    debug!("busy with another call; not calling {}", event.peer);
                    self.bus.dispatch(&CallEvent::CallEnded {
                        peer: event.peer,
                        reason: EndCallReason::Busy,
                        duration_secs: None,
                    });
                    return;
                }

                let mut session = CallSession::new_outgoing(event.peer.clone(), *media_kind);
                if let Some(call_id) = &event.call_id {
                    session.adopt_call_id(call_id);
                }

                if let Err(e) = session.apply_transition(CallTransition::OutboundStarted) {
                    warn!("failed to start outgoing call to {}: {e}", event.peer);
                    return;
                }

                let fingerprint = session.fingerprint.clone();
                self.cancel_flags
                    .insert(fingerprint.clone(), CancelFlag::new());
                self.timers
                    .schedule_ring_timeout(&fingerprint, self.config.ring_timeout);

                session.media_started = true;
                self.emit(
                    &fingerprint,
                    Effect::StartMedia {
                        role: CallRole::Caller,
                        peer: event.peer.clone(),
                    },
                );
                self.emit(
                    &fingerprint,
                    Effect::SendInvite {
                        peer: event.peer.clone(),
                        call_id: session
                            .call_id
                            .clone()
                            .expect("outgoing calls mint their id up front"),
                        media_kind: *media_kind,
                        description: None,
                    },
                );
                self.emit(
                    &fingerprint,
                    Effect::PresentOutgoing {
                        peer: event.peer.clone(),
                        media_kind: *media_kind,
                    },
                );

                self.bus.dispatch(&CallEvent::OutgoingCall {
                    peer: event.peer.clone(),
                    media_kind: *media_kind,
                });

                self.store.mint(session);
            }
            _ => unreachable!("only originating kinds reach originate()"),
        }
    }

    // ---- per-kind handlers ----

    /// A second delivery of an invite for an already-live attempt. The
    /// interesting case is a transport invite catching up with a session
    /// the wake path minted: it finally carries the signaling payload.
    fn on_repeat_invite(&mut self, event: RawEvent) {
        let Some(payload) = event.payload else {
            debug!("duplicate invite from {} without payload; ignoring", event.peer);
            return;
        };
        let session = self.store.live_mut(&event.peer).expect("live");
        if session.signal_payload.is_some() {
            debug!("duplicate invite from {}; payload already held", event.peer);
            return;
        }
        session.signal_payload = Some(payload);
        self.resume_if_wake_answered(&event.peer);
    }

    fn on_answer_intent(&mut self, event: RawEvent) {
        let session = self.store.live_mut(&event.peer).expect("live");
        match session.phase {
            CallPhase::IncomingRinging => {
                if session.signal_payload.is_some() {
                    self.begin_answer(&event.peer);
                } else {
                    // Answer tapped before the payload landed: fall back
                    // to ringing and wait, keeping the answered marker so
                    // the signal's arrival completes the answer without a
                    // second tap. The ring timer keeps governing the
                    // session.
                    if session.apply_transition(CallTransition::AnswerStarted).is_ok() {
                        let _ = session.apply_transition(CallTransition::AnswerDeferred);
                    }
                    session.answered_via_wake = true;
                    let fingerprint = session.fingerprint.clone();
                    debug!("no signal payload yet for {}; deferring answer", event.peer);
                    self.emit(&fingerprint, Effect::StopRinging);
                    self.emit(
                        &fingerprint,
                        Effect::PresentConnecting {
                            peer: event.peer.clone(),
                        },
                    );
                    self.bus.dispatch(&CallEvent::CallConnecting {
                        peer: event.peer.clone(),
                    });
                }
            }
            CallPhase::Answering => {
                debug!("already answering {}; ignoring duplicate answer", event.peer);
            }
            phase => {
                debug!("answer intent for {} in {phase:?}; ignoring", event.peer);
            }
        }
    }

    fn on_wake_answer_intent(&mut self, event: RawEvent) {
        let session = self.store.live_mut(&event.peer).expect("live");
        match session.phase {
            CallPhase::IncomingRinging => {
                // Sticky until termination; clearing it would drop answer
                // progress already made on the wake path.
                session.answered_via_wake = true;
                if session.signal_payload.is_some() {
                    self.begin_answer(&event.peer);
                } else {
                    if let Err(e) = session.apply_transition(CallTransition::AnswerStarted) {
                        warn!("wake answer for {} rejected: {e}", event.peer);
                        return;
                    }
                    let fingerprint = session.fingerprint.clone();
                    self.timers.cancel(&fingerprint, TimerKind::RingTimeout);
                    self.timers.schedule_wake_signal_wait(
                        &fingerprint,
                        self.config.wake_signal_interval,
                        self.config.wake_signal_max_attempts,
                    );
                    self.emit(&fingerprint, Effect::StopRinging);
                    self.emit(
                        &fingerprint,
                        Effect::PresentConnecting {
                            peer: event.peer.clone(),
                        },
                    );
                    self.bus.dispatch(&CallEvent::CallConnecting {
                        peer: event.peer.clone(),
                    });
                }
            }
            CallPhase::Answering => {
                debug!(
                    "duplicate wake answer for {}; already answering",
                    event.peer
                );
            }
            phase => {
                debug!("wake answer for {} in {phase:?}; ignoring", event.peer);
            }
        }
    }

    fn on_decline_intent(&mut self, event: RawEvent) {
        let session = self.store.live_mut(&event.peer).expect("live");
        if session.phase.is_terminal() {
            return;
        }
        session.pending_decline = true;
        self.finalize(&event.peer, EndCallReason::Declined, true);
    }

    fn on_cancel_intent(&mut self, event: RawEvent) {
        let session = self.store.live_mut(&event.peer).expect("live");
        if session.phase.is_terminal() {
            return;
        }

        let remote = event.source == EventSource::Transport;
        let reason = if remote {
            match session.phase {
                CallPhase::OutgoingRinging => EndCallReason::RemoteDeclined,
                _ => EndCallReason::RemoteEnded,
            }
        } else {
            session.pending_cancel = true;
            EndCallReason::UserEnded
        };

        // A cancel the remote side sent does not need echoing back.
        self.finalize(&event.peer, reason, !remote);
    }

    fn on_remote_signal(&mut self, event: RawEvent) {
        let Some(payload) = event.payload else {
            debug!("remote signal from {} without payload; ignoring", event.peer);
            return;
        };
        let session = self.store.live_mut(&event.peer).expect("live");
        match session.phase {
            CallPhase::OutgoingRinging => {
                // The peer accepted our call; the payload is its answer.
                session.signal_payload = Some(payload.clone());
                if let Err(e) = session.apply_transition(CallTransition::RemoteAccepted) {
                    warn!("remote accept for {} rejected: {e}", event.peer);
                    return;
                }
                let fingerprint = session.fingerprint.clone();
                self.timers.cancel(&fingerprint, TimerKind::RingTimeout);
                self.timers
                    .schedule_connect_failsafe(&fingerprint, self.config.connect_failsafe);
                self.emit(
                    &fingerprint,
                    Effect::ApplyRemoteDescription {
                        peer: event.peer.clone(),
                        description: payload,
                    },
                );
                self.emit(
                    &fingerprint,
                    Effect::PresentConnecting {
                        peer: event.peer.clone(),
                    },
                );
                self.bus.dispatch(&CallEvent::CallConnecting {
                    peer: event.peer.clone(),
                });
            }
            CallPhase::IncomingRinging | CallPhase::Answering => {
                if session.signal_payload.is_none() {
                    session.signal_payload = Some(payload);
                }
                self.resume_if_wake_answered(&event.peer);
            }
            phase => {
                debug!("remote signal for {} in {phase:?}; ignoring", event.peer);
            }
        }
    }

    fn on_remote_candidate(&mut self, event: RawEvent) {
        let Some(candidate) = event.payload else {
            return;
        };
        let session = self.store.live(&event.peer).expect("live");
        if !session.media_started {
            debug!(
                "candidate from {} before media started; dropping",
                event.peer
            );
            return;
        }
        let fingerprint = session.fingerprint.clone();
        self.emit(
            &fingerprint,
            Effect::AddRemoteCandidate {
                peer: event.peer.clone(),
                candidate,
            },
        );
    }

    fn on_transport_ack(&mut self, event: RawEvent) {
        let session = self.store.live_mut(&event.peer).expect("live");
        match session.phase {
            CallPhase::Answering => {
                if let Err(e) = session.apply_transition(CallTransition::AcceptConfirmed) {
                    warn!("accept confirmation for {} rejected: {e}", event.peer);
                    return;
                }
                let fingerprint = session.fingerprint.clone();
                self.timers
                    .schedule_connect_failsafe(&fingerprint, self.config.connect_failsafe);
            }
            phase => {
                debug!("transport ack for {} in {phase:?}; ignoring", event.peer);
            }
        }
    }

    fn on_connection_state(&mut self, event: RawEvent, state: ConnState) {
        let session = self.store.live_mut(&event.peer).expect("live");
        match (session.phase, state) {
            (CallPhase::Connecting, ConnState::Connected) => {
                if let Err(e) = session.apply_transition(CallTransition::MediaConnected) {
                    warn!("connect for {} rejected: {e}", event.peer);
                    return;
                }
                let fingerprint = session.fingerprint.clone();
                self.timers.cancel(&fingerprint, TimerKind::ConnectFailsafe);
                self.emit(
                    &fingerprint,
                    Effect::PresentConnected {
                        peer: event.peer.clone(),
                    },
                );
                self.bus.dispatch(&CallEvent::CallConnected {
                    peer: event.peer.clone(),
                });
            }
            (CallPhase::Connected, ConnState::Disconnected | ConnState::Failed) => {
                self.finalize(&event.peer, EndCallReason::ConnectionLost, true);
            }
            (
                CallPhase::Connecting | CallPhase::Answering,
                ConnState::Disconnected | ConnState::Failed,
            ) => {
                self.finalize(&event.peer, EndCallReason::ConnectFailed, true);
            }
            (phase, state) => {
                debug!(
                    "connection state {state:?} for {} in {phase:?}; ignoring",
                    event.peer
                );
            }
        }
    }

    fn on_busy_or_offline(&mut self, event: RawEvent, reason: BusyReason) {
        let session = self.store.live(&event.peer).expect("live");
        if session.phase.is_terminal() {
            return;
        }
        let reason = match reason {
            BusyReason::Busy => EndCallReason::Busy,
            BusyReason::Offline => EndCallReason::Offline,
        };
        self.finalize(&event.peer, reason, false);
    }

    fn on_ring_timeout(&mut self, event: RawEvent) {
        let session = self.store.live(&event.peer).expect("live");
        if session.phase.is_ringing() {
            self.finalize(&event.peer, EndCallReason::RingTimeout, true);
        } else {
            debug!(
                "late ring timeout for {} in {:?}; ignoring",
                event.peer, session.phase
            );
        }
    }

    fn on_connect_failsafe(&mut self, event: RawEvent) {
        let session = self.store.live(&event.peer).expect("live");
        if matches!(session.phase, CallPhase::Connecting | CallPhase::Answering) {
            self.finalize(&event.peer, EndCallReason::ConnectFailed, true);
        } else {
            debug!(
                "late connect failsafe for {} in {:?}; ignoring",
                event.peer, session.phase
            );
        }
    }

    fn on_wake_signal_poll(&mut self, event: RawEvent) {
        let session = self.store.live_mut(&event.peer).expect("live");
        if session.phase != CallPhase::Answering || session.signal_payload.is_some() {
            return;
        }
        session.wake_wait_attempts += 1;
        if session.wake_wait_attempts >= self.config.wake_signal_max_attempts {
            debug!(
                "signal never arrived for wake-answered call with {}; giving up",
                event.peer
            );
            self.finalize(&event.peer, EndCallReason::SignalTimeout, true);
        }
    }

    // ---- shared flows ----

    /// Answer an incoming call whose signal payload is present: accept
    /// goes out, media starts, and the session waits for the transport
    /// ack in `Answering`.
    fn begin_answer(&mut self, peer: &PeerId) {
        let session = self.store.live_mut(peer).expect("live");
        if let Err(e) = session.apply_transition(CallTransition::AnswerStarted) {
            warn!("answer for {peer} rejected: {e}");
            return;
        }
        session.media_started = true;
        let fingerprint = session.fingerprint.clone();
        let call_id = session.call_id.clone();
        let payload = session
            .signal_payload
            .clone()
            .expect("begin_answer requires a signal payload");

        self.timers.cancel(&fingerprint, TimerKind::RingTimeout);
        self.timers.cancel(&fingerprint, TimerKind::WakeSignalWait);
        // Governs the accept/connect stretch; rearmed when the ack moves
        // the session into Connecting.
        self.timers
            .schedule_connect_failsafe(&fingerprint, self.config.connect_failsafe);

        self.emit(&fingerprint, Effect::StopRinging);
        self.emit(
            &fingerprint,
            Effect::StartMedia {
                role: CallRole::Receiver,
                peer: peer.clone(),
            },
        );
        self.emit(
            &fingerprint,
            Effect::ApplyRemoteDescription {
                peer: peer.clone(),
                description: payload,
            },
        );
        if let Some(call_id) = call_id {
            self.emit(
                &fingerprint,
                Effect::SendAccept {
                    peer: peer.clone(),
                    call_id,
                    description: None,
                },
            );
        } else {
            // The payload implies a signaling message already landed, so
            // an id should exist; log loudly if this invariant slips.
            warn!("answering {peer} without an adopted call id");
        }
        self.emit(
            &fingerprint,
            Effect::PresentConnecting { peer: peer.clone() },
        );
        self.bus
            .dispatch(&CallEvent::CallConnecting { peer: peer.clone() });
    }

    /// A wake-answered session just received its signal payload: finish
    /// the answer without a second human tap.
    fn resume_if_wake_answered(&mut self, peer: &PeerId) {
        let session = self.store.live_mut(peer).expect("live");
        if !session.answered_via_wake || session.signal_payload.is_none() {
            return;
        }
        match session.phase {
            CallPhase::Answering => {
                // Rewind the wait posture so begin_answer can re-apply the
                // answer transition with the payload in hand.
                if session
                    .apply_transition(CallTransition::AnswerDeferred)
                    .is_err()
                {
                    return;
                }
                self.begin_answer(peer);
            }
            CallPhase::IncomingRinging => self.begin_answer(peer),
            _ => {}
        }
    }

    /// Terminal handling: ledger write, store removal, timer teardown,
    /// cancel-flag trip, teardown effects, bus notification.
    fn finalize(&mut self, peer: &PeerId, reason: EndCallReason, send_cancel: bool) {
        let Some(mut session) = self.store.remove(peer) else {
            return;
        };
        let pre_terminal_phase = session.phase;
        if let Err(e) = session.apply_transition(CallTransition::Terminated { reason }) {
            warn!("terminal transition for {peer} rejected: {e}");
            // Still tear everything down; a stuck session is worse.
        }

        let fingerprint = session.fingerprint.clone();
        self.ledger.record(
            peer.clone(),
            session.call_id.clone(),
            session.phase,
            reason,
        );
        self.timers.cancel_all(&fingerprint);
        if let Some(flag) = self.cancel_flags.remove(&fingerprint) {
            flag.trip();
        }

        let was_audibly_ringing = matches!(pre_terminal_phase, CallPhase::IncomingRinging);
        if was_audibly_ringing || session.answered_via_wake {
            self.emit(&fingerprint, Effect::StopRinging);
        }
        if send_cancel && !session.cancel_sent {
            session.cancel_sent = true;
            self.emit(
                &fingerprint,
                Effect::SendCancel {
                    peer: peer.clone(),
                    call_id: session.call_id.clone(),
                    reason,
                },
            );
        }
        if session.media_started {
            self.emit(&fingerprint, Effect::ReleaseMedia { peer: peer.clone() });
        }
        self.emit(&fingerprint, Effect::Dismiss);
        if session.direction() == CallDirection::Incoming {
            self.emit(&fingerprint, Effect::ClearHandoff { peer: peer.clone() });
        }

        self.bus.dispatch(&CallEvent::CallEnded {
            peer: peer.clone(),
            reason,
            duration_secs: session.duration_secs(),
        });
    }

    // ---- effect plumbing ----

    fn emit(&self, fingerprint: &CallFingerprint, effect: Effect) {
        let cancel = self
            .cancel_flags
            .get(fingerprint)
            .cloned()
            .unwrap_or_default();
        self.send_envelope(fingerprint.clone(), cancel, effect);
    }

    /// Emit an effect for a fingerprint with no live session (busy
    /// rejection of a second caller).
    fn emit_unscoped(&self, fingerprint: CallFingerprint, effect: Effect) {
        self.send_envelope(fingerprint, CancelFlag::new(), effect);
    }

    fn send_envelope(&self, fingerprint: CallFingerprint, cancel: CancelFlag, effect: Effect) {
        if self
            .effects_tx
            .send(EffectEnvelope {
                fingerprint,
                cancel,
                effect,
            })
            .is_err()
        {
            warn!("effect dispatcher is gone; effect dropped");
        }
    }
}
