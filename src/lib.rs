//! Call-session coordinator.
//!
//! Owns the lifecycle of a single voice/video call attempt between two
//! parties and produces a correct, exactly-once outcome (ring →
//! answer/decline/cancel → connect → end) even though the signals
//! describing that lifecycle arrive from four independent, racy
//! channels: the realtime signaling transport, the OS push/wake path,
//! the durable handoff store, and the in-process bus.
//!
//! # Architecture
//!
//! - [`sources`]: adapters normalizing each channel into one event shape
//! - [`coordinator`]: the single-worker arbiter every event flows through
//! - [`fencing`]: the ledger that keeps finalized attempts finalized
//! - [`store`]: one live session per peer, owned by the worker
//! - [`timers`]: ring-timeout, connect-failsafe and wake-wait timers
//! - [`effects`] / [`sinks`]: side-effect intents and the collaborator
//!   contracts they are dispatched to
//! - [`handoff`]: the durable record that carries call intent across
//!   process restarts

pub mod config;
pub mod coordinator;
pub mod effects;
pub mod error;
pub mod fencing;
pub mod handoff;
pub mod oob;
pub mod session;
pub mod sinks;
pub mod sources;
pub mod store;
pub mod timers;
pub mod types;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::CallError;
pub use session::{CallPhase, CallSession, CallTransition, InvalidTransition};
pub use types::call::{
    CallDirection, CallFingerprint, CallId, CallMediaType, CallRole, EndCallReason, PeerId,
};
pub use types::events::{
    BusyReason, CallEvent, CallEventHandler, ConnState, EventBus, EventKind, EventSource, RawEvent,
};
