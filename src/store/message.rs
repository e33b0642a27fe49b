//! In-memory message store

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;

use crate::error::{CoreError, Result};
use crate::pubsub::{Broker, EventType};
use crate::types::{CreateMessageParams, Message, MessageId, SessionId};

/// Storage contract for messages
///
/// Implemented by [`MessageStore`]; a database-backed store only needs to
/// implement this trait.
pub trait MessageRepository: Send + Sync {
    /// Create a message with a fresh ID
    ///
    /// # Errors
    /// Returns error if the backing store rejects the write
    fn create(
        &self,
        session_id: &SessionId,
        params: CreateMessageParams,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// Replace a stored message
    ///
    /// # Errors
    /// Returns `CoreError::MessageNotFound` if the message does not exist
    fn update(&self, message: &Message) -> impl Future<Output = Result<Message>> + Send;

    /// Fetch one message
    ///
    /// # Errors
    /// Returns `CoreError::MessageNotFound` if the message does not exist
    fn get(
        &self,
        session_id: &SessionId,
        id: &MessageId,
    ) -> impl Future<Output = Result<Message>> + Send;

    /// All messages of a session in insertion order
    ///
    /// # Errors
    /// Returns error if the backing store cannot be read
    fn list(&self, session_id: &SessionId) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Remove one message
    ///
    /// # Errors
    /// Returns `CoreError::MessageNotFound` if the message does not exist
    fn delete(
        &self,
        session_id: &SessionId,
        id: &MessageId,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Messages grouped by session, in insertion order
#[derive(Debug, Default)]
pub struct MessageStore {
    sessions: RwLock<HashMap<SessionId, Vec<Message>>>,
    events: Option<Broker<Message>>,
}

impl MessageStore {
    /// Create an empty store without events
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store publishing to `events`
    #[must_use]
    pub fn with_broker(events: Broker<Message>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            events: Some(events),
        }
    }

    /// Broker receiving mutations, if any
    #[must_use]
    pub fn events(&self) -> Option<&Broker<Message>> {
        self.events.as_ref()
    }

    /// Append a new message to `session_id`
    pub fn create(&self, session_id: &SessionId, params: CreateMessageParams) -> Message {
        let now = Utc::now();
        let message = Message {
            id: MessageId::generate(),
            session_id: session_id.clone(),
            role: params.role,
            parts: params.parts,
            model: params.model,
            provider: params.provider,
            created_at: now,
            updated_at: now,
        };

        self.sessions
            .write()
            .entry(session_id.clone())
            .or_default()
            .push(message.clone());
        self.publish(EventType::Created, &message);
        message
    }

    /// Append a copy of `message` under `session_id` keeping its content
    pub(crate) fn insert_copy(&self, session_id: &SessionId, message: &Message) -> Message {
        let now = Utc::now();
        let copy = Message {
            id: MessageId::generate(),
            session_id: session_id.clone(),
            created_at: now,
            updated_at: now,
            ..message.clone()
        };
        self.sessions
            .write()
            .entry(session_id.clone())
            .or_default()
            .push(copy.clone());
        self.publish(EventType::Created, &copy);
        copy
    }

    /// Replace a message's content; `updated_at` is refreshed
    ///
    /// # Errors
    /// Returns `CoreError::MessageNotFound` if the session or message is missing
    pub fn update(&self, message: &Message) -> Result<Message> {
        let updated = {
            let mut sessions = self.sessions.write();
            let stored = sessions
                .get_mut(&message.session_id)
                .and_then(|messages| messages.iter_mut().find(|m| m.id == message.id))
                .ok_or_else(|| CoreError::MessageNotFound(message.id.to_string()))?;

            stored.role = message.role;
            stored.parts.clone_from(&message.parts);
            stored.model.clone_from(&message.model);
            stored.provider.clone_from(&message.provider);
            stored.updated_at = Utc::now().max(stored.created_at);
            stored.clone()
        };
        self.publish(EventType::Updated, &updated);
        Ok(updated)
    }

    /// Fetch a copy of one message
    ///
    /// # Errors
    /// Returns `CoreError::MessageNotFound` if the session or message is missing
    pub fn get(&self, session_id: &SessionId, id: &MessageId) -> Result<Message> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|messages| messages.iter().find(|m| &m.id == id))
            .cloned()
            .ok_or_else(|| CoreError::MessageNotFound(id.to_string()))
    }

    /// Copies of every message in `session_id`; unknown sessions are empty
    #[must_use]
    pub fn list(&self, session_id: &SessionId) -> Vec<Message> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of messages in `session_id`
    #[must_use]
    pub fn count(&self, session_id: &SessionId) -> usize {
        self.sessions.read().get(session_id).map_or(0, Vec::len)
    }

    /// Remove one message
    ///
    /// # Errors
    /// Returns `CoreError::MessageNotFound` if the session or message is missing
    pub fn delete(&self, session_id: &SessionId, id: &MessageId) -> Result<()> {
        let removed = {
            let mut sessions = self.sessions.write();
            let messages = sessions
                .get_mut(session_id)
                .ok_or_else(|| CoreError::MessageNotFound(id.to_string()))?;
            let index = messages
                .iter()
                .position(|m| &m.id == id)
                .ok_or_else(|| CoreError::MessageNotFound(id.to_string()))?;
            messages.remove(index)
        };
        self.publish(EventType::Deleted, &removed);
        Ok(())
    }

    /// Remove every message of `session_id`, returning how many were removed
    pub fn delete_session(&self, session_id: &SessionId) -> usize {
        let removed = self.sessions.write().remove(session_id).unwrap_or_default();
        for message in &removed {
            self.publish(EventType::Deleted, message);
        }
        removed.len()
    }

    /// Remove every message of every session
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.sessions.write());
        for message in removed.values().flatten() {
            self.publish(EventType::Deleted, message);
        }
    }

    fn publish(&self, event_type: EventType, message: &Message) {
        if let Some(events) = &self.events {
            events.publish(event_type, message.clone());
        }
    }
}

impl MessageRepository for MessageStore {
    async fn create(&self, session_id: &SessionId, params: CreateMessageParams) -> Result<Message> {
        Ok(Self::create(self, session_id, params))
    }

    async fn update(&self, message: &Message) -> Result<Message> {
        Self::update(self, message)
    }

    async fn get(&self, session_id: &SessionId, id: &MessageId) -> Result<Message> {
        Self::get(self, session_id, id)
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<Message>> {
        Ok(Self::list(self, session_id))
    }

    async fn delete(&self, session_id: &SessionId, id: &MessageId) -> Result<()> {
        Self::delete(self, session_id, id)
    }
}
