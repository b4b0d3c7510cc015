//! Event source adapters.
//!
//! One task per channel: transport socket reader, OS wake listener,
//! handoff-store poller, local bus subscriber. Adapters normalize
//! platform input into [`crate::types::events::RawEvent`]s and enqueue
//! them; they never touch coordinator state. Correctness under the racy
//! interleavings these channels produce lives entirely in the
//! coordinator's fencing and guard rules.

pub mod bus;
pub mod handoff;
pub mod transport;
pub mod wake;
