//! Typed SSE payload structures for the chat-completions stream.
//!
//! Parse errors happen at the serde boundary, not scattered through parsing
//! logic. Unrecognized fields are ignored and optional fields default, so
//! new server-side additions do not break the stream.

use serde::Deserialize;

/// One `data:` payload from the chat-completions stream.
///
/// A payload normally carries `choices`; failure payloads carry `error`
/// instead (some gateways deliver errors mid-stream with a 200 status).
#[derive(Debug, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental content fragment. `content` is absent on role-only and
/// housekeeping deltas.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorInfo {
    #[serde(default, rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::ChatCompletionChunk;

    #[test]
    fn parses_content_delta() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"id":"c1","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hi"));
        assert!(chunk.choices[0].finish_reason.is_none());
    }

    #[test]
    fn parses_finish_without_content() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn parses_embedded_error_payload() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"error":{"message":"Rate limit reached","type":"rate_limit_error"}}"#,
        )
        .unwrap();
        let error = chunk.error.unwrap();
        assert_eq!(error.message, "Rate limit reached");
        assert_eq!(error.error_type, "rate_limit_error");
        assert!(chunk.choices.is_empty());
    }

    #[test]
    fn tolerates_unknown_fields() {
        let chunk: ChatCompletionChunk = serde_json::from_str(
            r#"{"object":"chat.completion.chunk","usage":{"total_tokens":3},"choices":[{"delta":{"role":"assistant"}}]}"#,
        )
        .unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }
}
