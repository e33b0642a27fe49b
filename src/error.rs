//! Error types for the agent execution core

use thiserror::Error;

use crate::shell::CommandOutput;

/// JSON-RPC error code for an unknown method
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Main error type for the agent execution core
#[derive(Error, Debug)]
pub enum CoreError {
    /// Shell command could not be parsed
    #[error("could not parse command (line {line}, column {column}): {message}")]
    Parse {
        /// Parser message
        message: String,
        /// 1-based line of the first syntax error
        line: usize,
        /// 1-based column of the first syntax error
        column: usize,
    },

    /// Shell command was cancelled or hit its deadline
    ///
    /// Carries whatever output had been captured before termination.
    #[error("command interrupted (exit code {})", output.exit_code)]
    Interrupted {
        /// Partial output of the interrupted command
        output: CommandOutput,
    },

    /// Command rejected by a block function
    #[error("command is not allowed: {0}")]
    CommandBlocked(String),

    /// A wait was abandoned because the caller cancelled
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A fixed capacity limit was reached
    #[error("maximum number of background jobs ({limit}) reached. Please terminate or wait for some jobs to complete")]
    ResourceExhausted {
        /// The configured limit
        limit: usize,
    },

    /// Connection error when communicating with an MCP server
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON-RPC error response
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Optional error payload
        data: Option<serde_json::Value>,
    },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Background job not found
    #[error("background shell not found: {0}")]
    JobNotFound(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Message not found
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// MCP server not configured
    #[error("mcp '{0}' not available")]
    ServerNotFound(String),

    /// MCP server configured but disabled
    #[error("mcp '{0}' is disabled")]
    ServerDisabled(String),

    /// Rejected connection state transition
    #[error("invalid state transition for '{name}': {from} -> {to}")]
    InvalidTransition {
        /// Server name
        name: String,
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Invalid tool arguments
    #[error("error parsing parameters: {0}")]
    InvalidArguments(String),

    /// JSON decode error
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>, line: usize, column: usize) -> Self {
        Self::Parse {
            message: msg.into(),
            line,
            column,
        }
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a JSON-RPC error
    pub fn rpc(code: i64, msg: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::Rpc {
            code,
            message: msg.into(),
            data,
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a JSON decode error from string
    pub fn json_decode(msg: impl Into<String>) -> Self {
        Self::JsonDecode(serde_json::Error::io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            msg.into(),
        )))
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Whether this is a JSON-RPC "Method not found" reply
    #[must_use]
    pub fn is_method_not_found(&self) -> bool {
        matches!(self, Self::Rpc { code, .. } if *code == METHOD_NOT_FOUND)
    }

    /// Whether this error was caused by caller cancellation or a deadline
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Interrupted { .. } | Self::Cancelled(_))
    }

    /// Whether this error means the remote end is unusable
    #[must_use]
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Transport(_) | Self::Timeout(_) | Self::Io(_)
        )
    }
}
