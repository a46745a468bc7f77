//! Chat-completions SSE client.
//!
//! Opens one streaming request per [`StreamConsumer::open_stream`] call,
//! asking the endpoint for `"stream": true`, and reports cumulative drafts
//! through the registered handler as content deltas arrive. The attempt runs
//! as an abortable Tokio task; the returned [`StreamHandle`] tears it down.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::{AbortHandle, Abortable};
use serde::Serialize;

use relay_types::{ApiKey, CompletionRequest, TransportError};

use crate::sse_types::ChatCompletionChunk;
use crate::{
    MAX_SSE_BUFFER_BYTES, MAX_SSE_PARSE_ERRORS, OPENAI_CHAT_COMPLETIONS_URL, StreamConsumer,
    StreamHandle, StreamHandler, http_client, next_sse_event, read_capped_error_body, sse_data,
    stream_idle_timeout,
};

/// Request body: the caller's request plus the streaming flag.
#[derive(Serialize)]
struct StreamingBody<'a> {
    #[serde(flatten)]
    request: &'a CompletionRequest,
    stream: bool,
}

/// SSE-over-HTTP implementation of [`StreamConsumer`].
///
/// Requires an ambient Tokio runtime: each attempt is spawned as a task
/// wrapped in an [`Abortable`].
#[derive(Debug, Clone)]
pub struct HttpStreamConsumer {
    endpoint: String,
}

impl HttpStreamConsumer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoint: OPENAI_CHAT_COMPLETIONS_URL.to_string(),
        }
    }

    /// Point the consumer at a different endpoint (tests, gateways).
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl Default for HttpStreamConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamConsumer for HttpStreamConsumer {
    fn open_stream(
        &self,
        request: CompletionRequest,
        api_key: &ApiKey,
        handler: Arc<dyn StreamHandler>,
    ) -> StreamHandle {
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let endpoint = self.endpoint.clone();
        let api_key = api_key.clone();

        let attempt = async move {
            let outcome =
                stream_completion(&endpoint, &request, &api_key, handler.as_ref()).await;
            match outcome {
                Ok(StreamEnd::Done) => handler.on_done(),
                Ok(StreamEnd::Failed(message)) => handler.on_error(TransportError::new(message)),
                Err(e) => {
                    tracing::warn!("streaming request failed: {e}");
                    handler.on_error(TransportError::new(format!("Request failed: {e}")));
                }
            }
        };

        tokio::spawn(async move {
            let _ = Abortable::new(attempt, abort_registration).await;
        });

        StreamHandle::new(abort_handle)
    }
}

/// How a fully-read stream ended.
#[derive(Debug)]
enum StreamEnd {
    Done,
    Failed(String),
}

async fn stream_completion(
    endpoint: &str,
    request: &CompletionRequest,
    api_key: &ApiKey,
    handler: &dyn StreamHandler,
) -> anyhow::Result<StreamEnd> {
    let body = StreamingBody {
        request,
        stream: true,
    };
    let response = http_client()
        .post(endpoint)
        .bearer_auth(api_key.as_str())
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = read_capped_error_body(response).await;
        return Ok(StreamEnd::Failed(format!(
            "API error {status}: {error_text}"
        )));
    }

    pump_sse(response, handler, stream_idle_timeout()).await
}

/// Read the SSE byte stream to its terminal condition.
///
/// Invariants: the event buffer stays under `MAX_SSE_BUFFER_BYTES`; at most
/// `MAX_SSE_PARSE_ERRORS` consecutive malformed payloads are tolerated; an
/// idle gap longer than `idle_timeout` ends the attempt.
async fn pump_sse(
    response: reqwest::Response,
    handler: &dyn StreamHandler,
    idle_timeout: Duration,
) -> anyhow::Result<StreamEnd> {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    let mut draft = String::new();
    let mut parse_errors = 0usize;

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            return Ok(StreamEnd::Failed("Stream idle timeout".to_string()));
        };
        let Some(chunk) = next else { break };
        buffer.extend_from_slice(&chunk?);

        if buffer.len() > MAX_SSE_BUFFER_BYTES {
            return Ok(StreamEnd::Failed(
                "SSE buffer exceeded maximum size (4 MiB)".to_string(),
            ));
        }

        while let Some(event) = next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }
            let Ok(event) = std::str::from_utf8(&event) else {
                return Ok(StreamEnd::Failed(
                    "Received invalid UTF-8 from SSE stream".to_string(),
                ));
            };
            let Some(data) = sse_data(event) else {
                continue;
            };

            if data == "[DONE]" {
                return Ok(StreamEnd::Done);
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(&data) {
                Ok(parsed) => {
                    parse_errors = 0;
                    parsed
                }
                Err(e) => {
                    parse_errors = parse_errors.saturating_add(1);
                    tracing::warn!(%e, payload_bytes = data.len(), "Invalid SSE JSON payload");
                    if parse_errors >= MAX_SSE_PARSE_ERRORS {
                        return Ok(StreamEnd::Failed(format!("Invalid stream payload: {e}")));
                    }
                    continue;
                }
            };

            if let Some(error) = chunk.error {
                let message = if error.message.is_empty() {
                    format!("Stream error: {}", error.error_type)
                } else {
                    error.message
                };
                return Ok(StreamEnd::Failed(message));
            }

            let mut finished = false;
            let mut grew = false;
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    draft.push_str(&content);
                    grew = true;
                }
                if choice.finish_reason.is_some() {
                    finished = true;
                }
            }
            // Handlers get the full draft, not the delta: each call supersedes
            // the previous one.
            if grew {
                handler.on_progress(&draft);
            }
            if finished {
                return Ok(StreamEnd::Done);
            }
        }
    }

    Ok(StreamEnd::Failed(
        "Connection closed before stream completed".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use relay_types::{ChatMessage, CompletionRequest};

    use super::StreamingBody;

    #[test]
    fn streaming_body_flattens_request_and_sets_flag() {
        let request = CompletionRequest::new(
            "gpt-3.5-turbo",
            vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
        );
        let body = StreamingBody {
            request: &request,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][1]["role"], "user");
    }
}
