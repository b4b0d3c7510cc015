//! Coordinator configuration.

use std::time::Duration;

/// Tunables for the call coordinator. Defaults match production behavior;
/// tests shrink the windows.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a call may ring before it is auto-declined.
    pub ring_timeout: Duration,
    /// How long media may stay in Connecting before the attempt is
    /// abandoned.
    pub connect_failsafe: Duration,
    /// Fixed interval between wake-signal polls. Constant rather than a
    /// backoff: the expected wait is a cold process finishing startup, a
    /// small constant.
    pub wake_signal_interval: Duration,
    /// Polls before a wake-path answer gives up with a signal timeout.
    pub wake_signal_max_attempts: u32,
    /// How long a finalized attempt fences its peer.
    pub ledger_ttl: Duration,
    /// Upper bound on remembered finalized attempts.
    pub ledger_capacity: usize,
    /// Interval between handoff-store scans after startup.
    pub handoff_scan_interval: Duration,
    /// Scans before the handoff poller stops.
    pub handoff_scan_attempts: u32,
    /// Endpoint for the out-of-band cancel fallback. None disables the
    /// fallback; realtime delivery failures are then final.
    pub oob_endpoint: Option<String>,
    /// Delivery attempts for one out-of-band cancel.
    pub oob_max_attempts: u32,
    /// Depth of the coordinator's event queue.
    pub event_queue_depth: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(60),
            connect_failsafe: Duration::from_secs(12),
            wake_signal_interval: Duration::from_millis(250),
            wake_signal_max_attempts: 12,
            ledger_ttl: Duration::from_secs(15),
            ledger_capacity: 64,
            handoff_scan_interval: Duration::from_millis(500),
            handoff_scan_attempts: 6,
            oob_endpoint: None,
            oob_max_attempts: 3,
            event_queue_depth: 256,
        }
    }
}
