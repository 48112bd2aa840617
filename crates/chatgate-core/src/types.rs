//! Canonical message model.
//!
//! These types are the provider-independent vocabulary at the gateway
//! boundary.  The [`crate::provider`] module translates them into each
//! vendor's wire format and back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::provider::ProviderEnvelope;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Input from the human user.
    User,
    /// System-level instructions that shape model behavior.
    System,
    /// Output from the model.
    Assistant,
}

impl Role {
    /// The lowercase wire name shared by both providers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::System => "system",
            Role::Assistant => "assistant",
        }
    }
}

/// A `{role, content}` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One prior turn of the conversation, supplied by the caller.
///
/// The gateway keeps no conversation state; history order is whatever the
/// caller passes and is forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Create a history entry stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// The canonical message carried by this entry.
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat request
// ---------------------------------------------------------------------------

/// A single chat turn to send through the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier.  Empty selects the provider default.
    #[serde(default)]
    pub model: String,

    /// The new user input for this turn.  Must be non-empty.
    pub message: String,

    /// Prior turns, forwarded after the new message and the tip.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,

    /// Optional system-role instruction for this turn only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tips: Option<ChatMessage>,

    /// Whether the provider should stream its answer.
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    /// Create a request carrying only a user message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Target a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Attach a system tip.
    pub fn with_tips(mut self, content: impl Into<String>) -> Self {
        self.tips = Some(ChatMessage::system(content));
        self
    }

    /// Attach prior conversation turns.
    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    /// Reject requests that must never reach the network.
    pub fn validate(&self) -> Result<()> {
        if self.message.is_empty() {
            return Err(GatewayError::validation("message must not be empty"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chat response
// ---------------------------------------------------------------------------

/// A completed answer, or one increment of a streamed answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub role: Role,
    pub content: String,
}

impl ChatResponse {
    /// An assistant response with the given content.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl Default for ChatResponse {
    fn default() -> Self {
        Self::assistant(String::new())
    }
}

/// Result of a non-streaming call: the canonical answer plus the provider's
/// full envelope (request id, usage, finish reason).
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub response: ChatResponse,
    pub raw: ProviderEnvelope,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_fails_validation() {
        let err = ChatRequest::new("").validate().unwrap_err();
        assert!(err.is_validation());
        assert!(ChatRequest::new("hi").validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let req = ChatRequest::new("hello")
            .with_model("qwen-plus")
            .with_tips("be brief")
            .with_history(vec![HistoryEntry::new(Role::Assistant, "earlier")]);

        assert_eq!(req.model, "qwen-plus");
        assert_eq!(req.tips, Some(ChatMessage::system("be brief")));
        assert_eq!(req.history.len(), 1);
        assert!(!req.stream);
    }

    #[test]
    fn role_serializes_lowercase() {
        let v = serde_json::to_value(ChatMessage::assistant("x")).unwrap();
        assert_eq!(v["role"], "assistant");
        let back: ChatMessage = serde_json::from_value(v).unwrap();
        assert_eq!(back.role, Role::Assistant);
    }

    #[test]
    fn history_entry_without_timestamp_deserializes() {
        let entry: HistoryEntry =
            serde_json::from_str(r#"{"role":"user","content":"earlier"}"#).unwrap();
        assert_eq!(entry.to_message(), ChatMessage::user("earlier"));
    }
}
