//! Request lifecycle state types.

use relay_types::TransportError;

/// Terminal outcome of a settled attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The transport reported a completed stream.
    Completed,
    /// The transport reported a failure.
    Failed(TransportError),
    /// The caller cancelled the attempt.
    Aborted,
}

/// Lifecycle state of a controller's current (or most recent) attempt.
///
/// # State Machine
/// ```text
/// ┌──────────────┐   start    ┌─────────────┐
/// │ Idle/Settled │ ─────────> │ Running     │
/// └──────────────┘            └─────────────┘
///        ^                          │
///        │   done / error / cancel  │
///        └──────────────────────────┘
/// ```
///
/// The three settle paths are the only exits from `Running`, and every
/// `Settled` state admits a fresh start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RequestState {
    #[default]
    Idle,
    Running,
    Settled(RequestOutcome),
}

impl RequestState {
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, RequestState::Running)
    }
}
