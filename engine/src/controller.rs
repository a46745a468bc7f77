//! The request controller: one streaming attempt at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;

use relay_providers::{StreamConsumer, StreamHandle, StreamHandler};
use relay_types::{ApiKey, ChatMessage, CompletionRequest, DEFAULT_MODEL, TransportError};

use crate::errors::{CancelRejected, StartRejected};
use crate::state::{RequestOutcome, RequestState};

/// Immutable inputs for a single request attempt.
///
/// All three fields must be non-empty after trimming before an attempt may
/// start. Trimming is validation-only: the untrimmed originals are what get
/// sent to the transport.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub api_key: ApiKey,
    pub system_instruction: String,
    pub user_instruction: String,
}

impl RequestConfig {
    pub fn new(
        api_key: impl Into<ApiKey>,
        system_instruction: impl Into<String>,
        user_instruction: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            system_instruction: system_instruction.into(),
            user_instruction: user_instruction.into(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.api_key.is_blank()
            && !self.system_instruction.trim().is_empty()
            && !self.user_instruction.trim().is_empty()
    }
}

/// Point-in-time view of the controller for rendering.
///
/// `completion_text` survives settling (completed, failed, or aborted) until
/// the next start, as does the most recent `error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub state: RequestState,
    pub completion_text: String,
    pub error: Option<TransportError>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: RequestState::Idle,
            completion_text: String::new(),
            error: None,
        }
    }
}

/// The state tuple guarded by the controller's mutex.
///
/// Invariant: `handle` is present if and only if `state` is `Running`.
struct Inner {
    state: RequestState,
    completion: String,
    error: Option<TransportError>,
    handle: Option<StreamHandle>,
    generation: u64,
    publisher: watch::Sender<Snapshot>,
}

impl Inner {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state.clone(),
            completion_text: self.completion.clone(),
            error: self.error.clone(),
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot());
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Don't leak a live connection when the controller goes away.
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Drives the lifecycle of streaming completion attempts.
///
/// At most one attempt is in flight at a time; starting while running is
/// rejected, never queued. Transport callbacks for superseded or settled
/// attempts are discarded via a per-attempt generation tag, which makes
/// cancellation race-free: `cancel` settles the state synchronously, so any
/// callback from the aborted attempt that arrives afterwards is stale.
pub struct RequestController {
    inner: Arc<Mutex<Inner>>,
    consumer: Arc<dyn StreamConsumer>,
    model: String,
}

impl RequestController {
    pub fn new(consumer: Arc<dyn StreamConsumer>) -> Self {
        Self::with_model(consumer, DEFAULT_MODEL)
    }

    pub fn with_model(consumer: Arc<dyn StreamConsumer>, model: impl Into<String>) -> Self {
        let (publisher, _) = watch::channel(Snapshot::default());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: RequestState::Idle,
                completion: String::new(),
                error: None,
                handle: None,
                generation: 0,
                publisher,
            })),
            consumer,
            model: model.into(),
        }
    }

    /// Open a new attempt.
    ///
    /// Returns immediately after registering the attempt; completion is
    /// reported through the snapshot as transport callbacks arrive. This is
    /// the only path that opens a transport-level request, and exactly one
    /// outbound connection results from a successful call.
    pub fn start(&self, config: RequestConfig) -> Result<(), StartRejected> {
        let mut inner = lock(&self.inner);
        if inner.state.is_running() {
            return Err(StartRejected::AlreadyRunning);
        }
        if !config.is_complete() {
            return Err(StartRejected::InvalidInput);
        }

        inner.generation = inner.generation.wrapping_add(1);
        inner.completion.clear();
        inner.error = None;
        inner.state = RequestState::Running;

        let handler = Arc::new(AttemptHandler {
            inner: Arc::downgrade(&self.inner),
            generation: inner.generation,
        });
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(config.system_instruction),
                ChatMessage::user(config.user_instruction),
            ],
        );

        tracing::debug!(generation = inner.generation, "opening stream");
        // The lock is held across open_stream so the handle-iff-running
        // invariant is established atomically; the trait contract forbids
        // synchronous callback delivery from inside open_stream.
        let handle = self.consumer.open_stream(request, &config.api_key, handler);
        inner.handle = Some(handle);
        inner.publish();
        Ok(())
    }

    /// Cancel the attempt in flight.
    ///
    /// Settles the state synchronously; the transport abort itself is
    /// fire-and-forget, and whatever callbacks the aborted connection still
    /// produces are ignored.
    pub fn cancel(&self) -> Result<(), CancelRejected> {
        let mut inner = lock(&self.inner);
        if !inner.state.is_running() {
            return Err(CancelRejected::NotRunning);
        }
        let Some(handle) = inner.handle.take() else {
            return Err(CancelRejected::NotRunning);
        };

        handle.abort();
        inner.state = RequestState::Settled(RequestOutcome::Aborted);
        tracing::debug!(generation = inner.generation, "attempt cancelled");
        inner.publish();
        Ok(())
    }

    /// Current state, completion text, and error. Never mutates.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        lock(&self.inner).snapshot()
    }

    /// Subscribe to snapshot updates.
    ///
    /// Every state-changing operation (start, cancel, transport callback)
    /// publishes a fresh snapshot, so a presentation layer can re-render on
    /// change instead of polling.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        lock(&self.inner).publisher.subscribe()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-attempt callback adapter.
///
/// Captures the generation it was registered under and mutates controller
/// state only while that attempt is the current, still-running one. A
/// callback arriving after its attempt settled (or after a newer attempt
/// started) is a silent no-op.
struct AttemptHandler {
    inner: Weak<Mutex<Inner>>,
    generation: u64,
}

impl AttemptHandler {
    fn with_live_attempt(&self, apply: impl FnOnce(&mut Inner)) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = lock(&inner);
        if inner.generation != self.generation || !inner.state.is_running() {
            tracing::debug!(generation = self.generation, "discarding stale callback");
            return;
        }
        apply(&mut inner);
        inner.publish();
    }
}

impl StreamHandler for AttemptHandler {
    fn on_progress(&self, draft: &str) {
        self.with_live_attempt(|inner| {
            // Drafts are cumulative snapshots; each one replaces the buffer
            // wholesale. Monotonic growth is not enforced.
            inner.completion.clear();
            inner.completion.push_str(draft);
        });
    }

    fn on_done(&self) {
        self.with_live_attempt(|inner| {
            inner.handle = None;
            inner.state = RequestState::Settled(RequestOutcome::Completed);
        });
    }

    fn on_error(&self, error: TransportError) {
        self.with_live_attempt(|inner| {
            inner.handle = None;
            inner.error = Some(error.clone());
            inner.state = RequestState::Settled(RequestOutcome::Failed(error));
        });
    }
}
