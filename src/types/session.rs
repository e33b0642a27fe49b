//! Conversation session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identifiers::SessionId;

/// A conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    /// Parent session for task/sub-agent sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<SessionId>,
    /// Human-readable title
    pub title: String,
    /// Number of messages in the session
    pub message_count: u64,
    /// Prompt tokens consumed
    pub prompt_tokens: u64,
    /// Completion tokens produced
    pub completion_tokens: u64,
    /// Accumulated cost in USD
    pub cost: f64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(title: impl Into<String>, parent_session_id: Option<SessionId>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            parent_session_id,
            title: title.into(),
            message_count: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this session was spawned by another session
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.parent_session_id.is_some()
    }
}
