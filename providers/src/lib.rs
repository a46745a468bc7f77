//! Streaming completion transport for Relay.
//!
//! # Architecture
//!
//! The crate defines the boundary the engine consumes and one concrete
//! implementation of it:
//!
//! - [`StreamConsumer`] - opens one streaming connection per call and reports
//!   back through a [`StreamHandler`]
//! - [`StreamHandle`] - cancellation token for an in-flight attempt
//! - [`openai::HttpStreamConsumer`] - SSE-over-HTTP client for the
//!   chat-completions endpoint
//!
//! # Callback contract
//!
//! A handler observes one attempt:
//!
//! | Callback | Meaning |
//! |----------|---------|
//! | `on_progress` | Cumulative draft of the completion so far |
//! | `on_done` | Stream completed successfully (at most once) |
//! | `on_error` | Stream terminated with a failure (at most once) |
//!
//! Drafts are snapshots, not increments: each `on_progress` call fully
//! supersedes the previous one. A well-behaved attempt ends with exactly one
//! of `on_done`/`on_error`; an aborted attempt may end with neither.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use futures_util::future::AbortHandle;

use relay_types::{ApiKey, CompletionRequest, TransportError};

pub use relay_types;

pub mod openai;
pub(crate) mod sse_types;

/// Canonical chat-completions endpoint.
pub const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

const MAX_SSE_PARSE_ERRORS: usize = 3;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build HTTP client: {e}. Falling back to defaults.");
                reqwest::Client::new()
            })
    })
}

pub(crate) fn stream_idle_timeout() -> Duration {
    static TIMEOUT: OnceLock<Duration> = OnceLock::new();
    *TIMEOUT.get_or_init(|| {
        let timeout = std::env::var("RELAY_STREAM_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_SECS);
        Duration::from_secs(timeout)
    })
}

// ============================================================================
// Boundary traits
// ============================================================================

/// Per-attempt callbacks invoked by a [`StreamConsumer`].
///
/// Implementations must be cheap and non-blocking; they are called from the
/// transport task as data arrives.
pub trait StreamHandler: Send + Sync {
    /// Cumulative draft of the completion text so far.
    fn on_progress(&self, draft: &str);
    /// The stream completed successfully.
    fn on_done(&self);
    /// The stream terminated with a failure.
    fn on_error(&self, error: TransportError);
}

/// A source of streaming completion attempts.
///
/// `open_stream` registers the handler, starts the attempt, and returns
/// immediately. It must not invoke any handler callback synchronously:
/// callbacks are delivered from the running attempt, never from inside
/// `open_stream` itself. The returned handle is the only way to cancel the
/// attempt.
pub trait StreamConsumer: Send + Sync {
    fn open_stream(
        &self,
        request: CompletionRequest,
        api_key: &ApiKey,
        handler: Arc<dyn StreamHandler>,
    ) -> StreamHandle;
}

/// Cancellation token for one in-flight streaming attempt.
///
/// Aborting is fire-and-forget: the attempt is torn down at its next await
/// point and delivers no further callbacks afterwards.
#[derive(Debug)]
pub struct StreamHandle {
    abort: AbortHandle,
}

impl StreamHandle {
    #[must_use]
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Request cancellation of the underlying connection.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

// ============================================================================
// SSE plumbing
// ============================================================================

/// Locate the earliest event delimiter (blank line) in the buffer.
///
/// Returns the event length and the delimiter length. Both `\n\n` and
/// `\r\n\r\n` terminate an event; whichever occurs first wins.
fn sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut boundary: Option<(usize, usize)> = None;
    if let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        boundary = Some((pos, 2));
    }
    if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
        if boundary.is_none_or(|(best, _)| pos < best) {
            boundary = Some((pos, 4));
        }
    }
    boundary
}

/// Remove and return the next complete SSE event, if the buffer holds one.
pub(crate) fn next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (len, delim) = sse_event_boundary(buffer)?;
    let event = buffer[..len].to_vec();
    buffer.drain(..len + delim);
    Some(event)
}

/// Join the `data:` lines of one SSE event, or `None` if it carries no data.
pub(crate) fn sse_data(event: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(rest) = line.strip_prefix("data:") else {
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match data.as_mut() {
            Some(joined) => {
                joined.push('\n');
                joined.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }
    data
}

pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{next_sse_event, sse_data, sse_event_boundary};

    mod boundary {
        use super::sse_event_boundary;

        #[test]
        fn finds_lf_delimiter() {
            assert_eq!(sse_event_boundary(b"data: a\n\ndata: b"), Some((7, 2)));
        }

        #[test]
        fn finds_crlf_delimiter() {
            assert_eq!(sse_event_boundary(b"data: a\r\n\r\nrest"), Some((7, 4)));
        }

        #[test]
        fn earliest_delimiter_wins() {
            assert_eq!(sse_event_boundary(b"a\n\nb\r\n\r\n"), Some((1, 2)));
            assert_eq!(sse_event_boundary(b"a\r\n\r\nb\n\n"), Some((1, 4)));
        }

        #[test]
        fn none_without_blank_line() {
            assert_eq!(sse_event_boundary(b"data: partial\n"), None);
            assert_eq!(sse_event_boundary(b""), None);
        }
    }

    mod drain {
        use super::next_sse_event;

        #[test]
        fn takes_events_in_order() {
            let mut buffer = b"event: a\n\nevent: b\n\n".to_vec();
            assert_eq!(next_sse_event(&mut buffer), Some(b"event: a".to_vec()));
            assert_eq!(next_sse_event(&mut buffer), Some(b"event: b".to_vec()));
            assert_eq!(next_sse_event(&mut buffer), None);
        }

        #[test]
        fn leaves_incomplete_event_buffered() {
            let mut buffer = b"data: incomplete".to_vec();
            assert_eq!(next_sse_event(&mut buffer), None);
            assert_eq!(buffer, b"data: incomplete");
        }

        #[test]
        fn crlf_delimiter_is_consumed() {
            let mut buffer = b"data: x\r\n\r\nrest".to_vec();
            assert_eq!(next_sse_event(&mut buffer), Some(b"data: x".to_vec()));
            assert_eq!(buffer, b"rest");
        }
    }

    mod data {
        use super::sse_data;

        #[test]
        fn extracts_data_line() {
            assert_eq!(sse_data("data: hello"), Some("hello".to_string()));
            assert_eq!(sse_data("data:hello"), Some("hello".to_string()));
        }

        #[test]
        fn joins_multiline_data() {
            assert_eq!(
                sse_data("data: one\ndata: two"),
                Some("one\ntwo".to_string())
            );
        }

        #[test]
        fn skips_non_data_fields() {
            assert_eq!(
                sse_data("event: message\nid: 7\ndata: payload\nretry: 1000"),
                Some("payload".to_string())
            );
            assert_eq!(sse_data("event: ping\nid: 8"), None);
        }

        #[test]
        fn strips_trailing_carriage_return() {
            assert_eq!(sse_data("data: windows\r"), Some("windows".to_string()));
        }

        #[test]
        fn preserves_done_marker() {
            assert_eq!(sse_data("data: [DONE]"), Some("[DONE]".to_string()));
        }
    }
}
