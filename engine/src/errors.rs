//! Rejection values for controller operations.
//!
//! Every rejection is returned as a value and leaves the controller state
//! untouched; none of them is fatal to the session.

use thiserror::Error;

/// Why `start` refused to open an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StartRejected {
    /// One or more request fields were blank after trimming.
    #[error("api key, system instruction, and user instruction must be non-empty")]
    InvalidInput,
    /// An attempt is already in flight; cancel it or wait for it to settle.
    #[error("a request is already running")]
    AlreadyRunning,
}

/// Why `cancel` refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancelRejected {
    /// There is no active attempt to cancel.
    #[error("no request is running")]
    NotRunning,
}
