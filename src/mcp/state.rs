//! Connection state machine and the events it emits

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::protocol::{Resource, Tool};

/// Lifecycle state of one configured server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Configured but not started
    #[default]
    Disabled,
    /// Connecting
    Starting,
    /// Session established and inventory loaded
    Connected,
    /// Last connect or call failed
    Error,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is allowed
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Disabled, Error, Starting};
        matches!(
            (self, next),
            (Disabled, Starting)
                | (Starting, Connected | Error | Disabled)
                | (Connected, Connected | Error | Disabled)
                | (Error, Starting | Error | Disabled)
        )
    }

    /// Lower-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Starting => "starting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inventory sizes reported with state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counts {
    /// Visible tools
    pub tools: usize,
    /// Resources
    pub resources: usize,
}

/// Snapshot of one server's connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Configured server name
    pub name: String,
    /// Current state
    pub state: ConnectionState,
    /// Cached tools, filtered by the disabled list
    pub tools: Vec<Tool>,
    /// Cached resources
    pub resources: Vec<Resource>,
    /// Message of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Inventory sizes
    pub counts: Counts,
    /// When the current session was established
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

/// What an [`McpEvent`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpEventKind {
    /// Connection state changed (or was re-confirmed)
    StateChanged,
    /// Tool inventory was reloaded
    ToolsListChanged,
    /// Resource inventory was reloaded
    ResourcesListChanged,
}

/// Payload published on the registry's broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpEvent {
    /// Server name
    pub name: String,
    /// Event kind
    pub kind: McpEventKind,
    /// State after the change
    pub state: ConnectionState,
    /// Failure message for `Error` states
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Inventory sizes after the change
    pub counts: Counts,
}
