//! Conversation message types
//!
//! A [`Message`] belongs to exactly one session and carries an ordered list of
//! [`ContentPart`]s. Parts serialize as `{"type": ..., "data": ...}` wrappers
//! so the part kind survives a round trip through storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifiers::{MessageId, SessionId};

// ============================================================================
// Roles
// ============================================================================

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Assistant (model) output
    Assistant,
    /// User input
    User,
    /// System prompt
    System,
    /// Tool results
    Tool,
}

// ============================================================================
// Content parts
// ============================================================================

/// Why the model stopped producing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of turn
    EndTurn,
    /// Token budget exhausted
    MaxTokens,
    /// Model requested tool calls
    ToolUse,
    /// Cancelled by the user
    Canceled,
    /// Provider error
    Error,
    /// Tool call denied by permissions
    PermissionDenied,
    /// Anything else
    Unknown,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call ID
    pub id: String,
    /// Tool name
    pub name: String,
    /// Raw JSON input
    pub input: String,
    /// Whether the call arguments are fully streamed
    #[serde(default)]
    pub finished: bool,
}

/// The outcome of a tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the call this answers
    pub tool_call_id: String,
    /// Tool name
    pub name: String,
    /// Result content
    pub content: String,
    /// Extra metadata (JSON)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    /// Whether the tool failed
    #[serde(default)]
    pub is_error: bool,
}

/// One ordered piece of a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContentPart {
    /// Model reasoning / thinking
    Reasoning {
        /// Reasoning text
        thinking: String,
    },
    /// Plain text
    Text {
        /// Text content
        text: String,
    },
    /// Image referenced by URL
    ImageUrl {
        /// Image URL
        url: String,
        /// Optional detail hint
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Inline binary attachment (base64)
    Binary {
        /// Original path, if any
        path: String,
        /// MIME type
        mime_type: String,
        /// Base64 payload
        data: String,
    },
    /// Tool call
    ToolCall(ToolCall),
    /// Tool result
    ToolResult(ToolResult),
    /// End of turn marker
    Finish {
        /// Why the turn ended
        reason: FinishReason,
        /// When the turn ended
        time: DateTime<Utc>,
    },
}

// ============================================================================
// Message
// ============================================================================

/// A conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Owning session
    pub session_id: SessionId,
    /// Author role
    pub role: MessageRole,
    /// Ordered content parts
    pub parts: Vec<ContentPart>,
    /// Model that produced the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Provider that produced the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Concatenated text of all text parts
    #[must_use]
    pub fn content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All tool calls in this message
    #[must_use]
    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Finish reason if the turn has ended
    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.parts.iter().find_map(|part| match part {
            ContentPart::Finish { reason, .. } => Some(*reason),
            _ => None,
        })
    }

    /// Whether a finish part is present
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finish_reason().is_some()
    }
}

/// Parameters for creating a message
#[derive(Debug, Clone, PartialEq)]
pub struct CreateMessageParams {
    /// Author role
    pub role: MessageRole,
    /// Ordered content parts
    pub parts: Vec<ContentPart>,
    /// Model name
    pub model: Option<String>,
    /// Provider name
    pub provider: Option<String>,
}

impl CreateMessageParams {
    /// Parameters for a single-text message
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text { text: text.into() }],
            model: None,
            provider: None,
        }
    }
}
