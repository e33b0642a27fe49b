//! Event envelope delivered to subscribers

use serde::{Deserialize, Serialize};

/// Kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// A new item appeared
    Created,
    /// An existing item changed
    Updated,
    /// An item was removed
    Deleted,
}

/// A published event carrying one payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event<T> {
    /// Kind of change
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Payload
    pub payload: T,
}

impl<T> Event<T> {
    /// Create a new event
    pub const fn new(event_type: EventType, payload: T) -> Self {
        Self {
            event_type,
            payload,
        }
    }
}
