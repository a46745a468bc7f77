//! Core domain types for Relay.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the driver.

use serde::Serialize;
use thiserror::Error;

/// Model requested when the caller does not pick one.
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

// ============================================================================
// API Key
// ============================================================================

/// Opaque API credential.
///
/// Note: `Debug` is manually implemented to redact the key value, preventing
/// accidental credential disclosure in logs or error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key is empty after trimming surrounding whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey(<redacted>)")
    }
}

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Wire Request Types
// ============================================================================

/// Conversation role on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry in the ordered message sequence sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Wire request for one streaming completion attempt.
///
/// Message content travels exactly as provided by the caller; any trimming
/// done for input validation never reaches the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
        }
    }
}

// ============================================================================
// Transport Error
// ============================================================================

/// Opaque failure reported by the stream transport.
///
/// The driver never interprets these; the message is carried verbatim to
/// whoever renders the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for TransportError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for TransportError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApiKey, ChatMessage, CompletionRequest, Role, TransportError};

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-secret-value");
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("secret"));
        assert_eq!(rendered, "ApiKey(<redacted>)");
    }

    #[test]
    fn api_key_blankness_ignores_whitespace() {
        assert!(ApiKey::new("").is_blank());
        assert!(ApiKey::new("   \t").is_blank());
        assert!(!ApiKey::new(" k ").is_blank());
    }

    #[test]
    fn roles_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn completion_request_serializes_wire_shape() {
        let request = CompletionRequest::new(
            "gpt-3.5-turbo",
            vec![
                ChatMessage::system("You are a helpful assistant."),
                ChatMessage::user("  padded prompt  "),
            ],
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "  padded prompt  ");
    }

    #[test]
    fn transport_error_displays_message_verbatim() {
        let err = TransportError::new("API error 500: boom");
        assert_eq!(err.to_string(), "API error 500: boom");
        assert_eq!(err.message(), "API error 500: boom");
    }
}
