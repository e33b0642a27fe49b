//! Capability negotiation for the MCP `initialize` handshake

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

/// MCP protocol revision this client speaks
pub const PROTOCOL_VERSION: &str = "2025-06-18";

bitflags! {
    /// Capabilities advertised by a server in its `initialize` result
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServerCapabilities: u8 {
        /// Server exposes tools
        const TOOLS = 0b0001;
        /// Server exposes resources
        const RESOURCES = 0b0010;
        /// Server exposes prompts
        const PROMPTS = 0b0100;
        /// Server emits log messages
        const LOGGING = 0b1000;
    }
}

const CAPABILITY_KEYS: &[(&str, ServerCapabilities)] = &[
    ("tools", ServerCapabilities::TOOLS),
    ("resources", ServerCapabilities::RESOURCES),
    ("prompts", ServerCapabilities::PROMPTS),
    ("logging", ServerCapabilities::LOGGING),
];

// MCP encodes capabilities as an object whose keys are present when supported
impl Serialize for ServerCapabilities {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = Map::new();
        for (key, flag) in CAPABILITY_KEYS {
            if self.contains(*flag) {
                map.insert((*key).to_string(), json!({}));
            }
        }
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServerCapabilities {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        let mut caps = Self::empty();
        for (key, flag) in CAPABILITY_KEYS {
            if map.get(*key).is_some_and(|v| !v.is_null()) {
                caps |= *flag;
            }
        }
        Ok(caps)
    }
}

/// Name and version of a protocol participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Program name
    pub name: String,
    /// Program version
    pub version: String,
}

impl Implementation {
    /// This crate's identity
    #[must_use]
    pub fn client() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Result of the `initialize` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol revision chosen by the server
    pub protocol_version: String,
    /// Server capabilities
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_info: Option<Implementation>,
    /// Usage instructions for the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Parameters of the `initialize` request sent by this client
#[must_use]
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": Implementation::client(),
    })
}
