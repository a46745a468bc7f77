//! Request lifecycle state machine for Relay.
//!
//! The [`RequestController`] owns the lifecycle of streaming completion
//! attempts: it mediates start and cancel intents against the current state,
//! accumulates the growing completion text, and exposes everything a
//! presentation layer needs through a re-renderable [`Snapshot`].
//!
//! At most one attempt is in flight per controller. The transport is
//! consumed as a black box through the `StreamConsumer` trait; its callbacks
//! drive the state transitions, guarded by a per-attempt generation tag so a
//! late callback from a superseded or cancelled attempt can never touch a
//! newer one.

mod controller;
mod errors;
mod state;


pub use controller::{RequestConfig, RequestController, Snapshot};
pub use errors::{CancelRejected, StartRejected};
pub use state::{RequestOutcome, RequestState};
