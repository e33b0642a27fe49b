//! In-memory session store

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::{CoreError, Result};
use crate::pubsub::{Broker, EventType};
use crate::types::{MessageId, Session, SessionId};

use super::message::MessageStore;

/// Title prefix of sessions created by [`SessionStore::fork`]
pub const FORK_TITLE_PREFIX: &str = "Forked: ";

/// Conversation sessions keyed by ID
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    events: Option<Broker<Session>>,
}

impl SessionStore {
    /// Create an empty store without events
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store publishing to `events`
    #[must_use]
    pub fn with_broker(events: Broker<Session>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            events: Some(events),
        }
    }

    /// Broker receiving mutations, if any
    #[must_use]
    pub fn events(&self) -> Option<&Broker<Session>> {
        self.events.as_ref()
    }

    /// Create a top-level session
    pub fn create(&self, title: impl Into<String>) -> Session {
        self.insert(Session::new(title, None))
    }

    /// Create a session owned by `parent_id` (task or sub-agent runs)
    ///
    /// # Errors
    /// Returns `CoreError::SessionNotFound` if the parent does not exist
    pub fn create_child(&self, parent_id: &SessionId, title: impl Into<String>) -> Result<Session> {
        if !self.sessions.read().contains_key(parent_id) {
            return Err(CoreError::SessionNotFound(parent_id.to_string()));
        }
        Ok(self.insert(Session::new(title, Some(parent_id.clone()))))
    }

    /// Fetch a copy of one session
    ///
    /// # Errors
    /// Returns `CoreError::SessionNotFound` if it does not exist
    pub fn get(&self, id: &SessionId) -> Result<Session> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))
    }

    /// Copies of every session, newest first
    #[must_use]
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Replace a stored session; `updated_at` is refreshed
    ///
    /// # Errors
    /// Returns `CoreError::SessionNotFound` if it does not exist
    pub fn update(&self, session: &Session) -> Result<Session> {
        let updated = {
            let mut sessions = self.sessions.write();
            let stored = sessions
                .get_mut(&session.id)
                .ok_or_else(|| CoreError::SessionNotFound(session.id.to_string()))?;
            let created_at = stored.created_at;
            *stored = Session {
                created_at,
                updated_at: Utc::now().max(created_at),
                ..session.clone()
            };
            stored.clone()
        };
        self.publish(EventType::Updated, &updated);
        Ok(updated)
    }

    /// Remove a session
    ///
    /// # Errors
    /// Returns `CoreError::SessionNotFound` if it does not exist
    pub fn delete(&self, id: &SessionId) -> Result<()> {
        let removed = self
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))?;
        self.publish(EventType::Deleted, &removed);
        Ok(())
    }

    /// Remove every session
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.sessions.write());
        for session in removed.values() {
            self.publish(EventType::Deleted, session);
        }
    }

    /// Start a new session from the history of `source_id` before `message_id`
    ///
    /// Messages up to but excluding `message_id` are copied into the new
    /// session with fresh IDs; the source session is untouched.
    ///
    /// # Errors
    /// - `CoreError::SessionNotFound` if the source session does not exist
    /// - `CoreError::MessageNotFound` if `message_id` is not in the source
    pub fn fork(
        &self,
        source_id: &SessionId,
        message_id: &MessageId,
        messages: &MessageStore,
    ) -> Result<Session> {
        let source = self.get(source_id)?;
        let history = messages.list(source_id);
        let cut = history
            .iter()
            .position(|m| &m.id == message_id)
            .ok_or_else(|| CoreError::MessageNotFound(message_id.to_string()))?;

        let mut forked = Session::new(format!("{FORK_TITLE_PREFIX}{}", source.title), None);
        forked.parent_session_id.clone_from(&source.parent_session_id);
        forked.message_count = cut as u64;
        let forked = self.insert(forked);

        for message in &history[..cut] {
            messages.insert_copy(&forked.id, message);
        }

        log::debug!(
            "Forked session {} into {} with {cut} messages",
            source.id,
            forked.id
        );
        Ok(forked)
    }

    fn insert(&self, session: Session) -> Session {
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        self.publish(EventType::Created, &session);
        session
    }

    fn publish(&self, event_type: EventType, session: &Session) {
        if let Some(events) = &self.events {
            events.publish(event_type, session.clone());
        }
    }
}
