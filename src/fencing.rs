//! Fencing ledger: rejects events describing an already-finalized attempt.

use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::session::CallPhase;
use crate::types::call::{CallId, EndCallReason, PeerId};

/// Record of a finalized call attempt.
#[derive(Debug, Clone)]
pub struct FencedAttempt {
    pub call_id: Option<CallId>,
    /// Monotonic, for TTL math.
    pub finalized_at: Instant,
    /// Wall clock, compared against event `source_ts` to let a genuinely
    /// new invite through.
    pub finalized_at_wall: DateTime<Utc>,
    pub phase: CallPhase,
    pub reason: EndCallReason,
}

/// Bounded, time-windowed record of finalized attempts per peer.
///
/// Fencing keys by peer alone; call-id equality is only checked when both
/// the event and the ledger entry carry one. The same physical call is
/// routinely described both with and without an id (the id often lands
/// only on the first signaling message), so requiring ids to match would
/// let duplicate wake deliveries straight through.
pub struct FencingLedger {
    entries: HashMap<PeerId, FencedAttempt>,
    ttl: Duration,
    capacity: usize,
}

impl FencingLedger {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            capacity,
        }
    }

    /// Record a finalized attempt for this peer.
    pub fn record(
        &mut self,
        peer: PeerId,
        call_id: Option<CallId>,
        phase: CallPhase,
        reason: EndCallReason,
    ) {
        self.prune();
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&peer) {
            // Evict the oldest entry rather than growing without bound.
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.finalized_at)
                .map(|(p, _)| p.clone())
            {
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            peer,
            FencedAttempt {
                call_id,
                finalized_at: Instant::now(),
                finalized_at_wall: Utc::now(),
                phase,
                reason,
            },
        );
    }

    /// Should this event be dropped as a duplicate of a finalized attempt?
    ///
    /// An event whose `source_ts` postdates the finalization describes a
    /// new attempt and is admitted even inside the TTL window; a matching
    /// call-id is always a duplicate, whatever its timestamp claims.
    pub fn is_fenced(
        &self,
        peer: &PeerId,
        call_id: Option<&CallId>,
        source_ts: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.entries.get(peer) else {
            return false;
        };
        if entry.finalized_at.elapsed() > self.ttl {
            return false;
        }

        if let (Some(fenced_id), Some(event_id)) = (&entry.call_id, call_id) {
            if fenced_id == event_id {
                debug!(
                    "dropping duplicate event for finalized call {event_id} with {peer}"
                );
                return true;
            }
        }

        // Different or missing call id: only the original emission time
        // decides. Re-deliveries carry the original timestamp and stay
        // behind the fence; a new invite after finalization always wins.
        if source_ts <= entry.finalized_at_wall {
            debug!("dropping stale event for {peer} predating finalization");
            return true;
        }
        false
    }

    pub fn get(&self, peer: &PeerId) -> Option<&FencedAttempt> {
        self.entries.get(peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| e.finalized_at.elapsed() <= ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ledger() -> FencingLedger {
        FencingLedger::new(Duration::from_secs(15), 64)
    }

    #[test]
    fn matching_call_id_is_fenced() {
        let mut ledger = ledger();
        let alice = PeerId::from("alice");
        let c1 = CallId::new("C1");

        ledger.record(
            alice.clone(),
            Some(c1.clone()),
            CallPhase::Canceled,
            EndCallReason::Declined,
        );

        // Duplicate delivery carries the original (pre-finalization) ts.
        let original_ts = Utc::now() - TimeDelta::seconds(5);
        assert!(ledger.is_fenced(&alice, Some(&c1), original_ts));
        // Even a forged-late timestamp does not unfence a matching id.
        assert!(ledger.is_fenced(&alice, Some(&c1), Utc::now() + TimeDelta::seconds(5)));
    }

    #[test]
    fn id_less_duplicate_is_fenced_by_timestamp() {
        let mut ledger = ledger();
        let alice = PeerId::from("alice");

        ledger.record(
            alice.clone(),
            Some(CallId::new("C1")),
            CallPhase::Canceled,
            EndCallReason::Declined,
        );

        let original_ts = Utc::now() - TimeDelta::seconds(5);
        assert!(ledger.is_fenced(&alice, None, original_ts));
    }

    #[test]
    fn fresh_invite_after_finalization_is_admitted() {
        let mut ledger = ledger();
        let alice = PeerId::from("alice");

        ledger.record(
            alice.clone(),
            Some(CallId::new("C1")),
            CallPhase::Canceled,
            EndCallReason::Declined,
        );

        let fresh_ts = Utc::now() + TimeDelta::seconds(2);
        let c2 = CallId::new("C2");
        assert!(!ledger.is_fenced(&alice, Some(&c2), fresh_ts));
        assert!(!ledger.is_fenced(&alice, None, fresh_ts));
    }

    #[test]
    fn other_peers_are_not_fenced() {
        let mut ledger = ledger();
        ledger.record(
            PeerId::from("alice"),
            None,
            CallPhase::Ended,
            EndCallReason::UserEnded,
        );

        let old_ts = Utc::now() - TimeDelta::seconds(5);
        assert!(!ledger.is_fenced(&PeerId::from("bob"), None, old_ts));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut ledger = FencingLedger::new(Duration::from_secs(60), 2);
        for name in ["a", "b", "c"] {
            ledger.record(
                PeerId::from(name),
                None,
                CallPhase::Canceled,
                EndCallReason::Declined,
            );
        }
        assert_eq!(ledger.len(), 2);
        assert!(ledger.get(&PeerId::from("a")).is_none());
        assert!(ledger.get(&PeerId::from("c")).is_some());
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let mut ledger = FencingLedger::new(Duration::from_secs(0), 64);
        let alice = PeerId::from("alice");
        ledger.record(
            alice.clone(),
            None,
            CallPhase::Canceled,
            EndCallReason::Declined,
        );
        std::thread::sleep(Duration::from_millis(5));
        let old_ts = Utc::now() - TimeDelta::seconds(5);
        assert!(!ledger.is_fenced(&alice, None, old_ts));
    }
}
