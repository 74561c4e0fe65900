//! Broadcast orchestration: retry policy, per-channel supervisors and the
//! channel registry.

mod manager;
mod retry;
mod supervisor;

pub use manager::{ChannelManager, ShutdownReport};
pub use retry::{
    DEFAULT_IDLE_POLL, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_RETRY_DELAY, FailureTracker,
    FailureVerdict, RetryPolicy,
};
pub use supervisor::{
    DEFAULT_STOP_TIMEOUT, StateChange, StopKind, StreamSupervisor, SupervisorDeps,
    SupervisorSettings,
};
