//! Tool call result classification
//!
//! Tool output is collapsed into one of three shapes the agent understands:
//! plain text, text plus an image, or text plus other media.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use super::protocol::{CallToolResult, ContentBlock};

/// Outcome of running an MCP tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResult {
    /// Text only
    Text {
        /// Joined text blocks
        content: String,
    },
    /// The first image block, plus all text
    Image {
        /// Joined text blocks
        content: String,
        /// Base64 image data
        data: String,
        /// MIME type
        media_type: String,
    },
    /// The first audio block, plus all text
    Media {
        /// Joined text blocks
        content: String,
        /// Base64 media data
        data: String,
        /// MIME type
        media_type: String,
    },
}

impl ToolResult {
    /// Text portion of the result
    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::Text { content } | Self::Image { content, .. } | Self::Media { content, .. } => {
                content
            }
        }
    }
}

impl From<CallToolResult> for ToolResult {
    fn from(result: CallToolResult) -> Self {
        let mut text_parts = Vec::new();
        let mut image: Option<(String, String)> = None;
        let mut audio: Option<(String, String)> = None;

        for block in result.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text),
                ContentBlock::Image { data, mime_type } => {
                    image.get_or_insert((data, mime_type));
                }
                ContentBlock::Audio { data, mime_type } => {
                    audio.get_or_insert((data, mime_type));
                }
                ContentBlock::Resource { resource } => {
                    text_parts.push(resource.text.unwrap_or_else(|| resource.uri.clone()));
                }
                ContentBlock::Other(value) => text_parts.push(value.to_string()),
            }
        }

        let content = text_parts.join("\n");

        if let Some((data, media_type)) = image {
            return Self::Image {
                content,
                data: ensure_base64(data.as_bytes()),
                media_type,
            };
        }
        if let Some((data, media_type)) = audio {
            return Self::Media {
                content,
                data: ensure_base64(data.as_bytes()),
                media_type,
            };
        }
        Self::Text { content }
    }
}

/// Return `data` unchanged if it already looks like base64, else encode it
///
/// Some servers (for example browser automation running in containers) send
/// raw bytes where base64 is expected.
#[must_use]
pub fn ensure_base64(data: &[u8]) -> String {
    if is_valid_base64(data) {
        String::from_utf8_lossy(data).into_owned()
    } else {
        STANDARD.encode(data)
    }
}

/// ASCII-only and decodes as standard padded base64
#[must_use]
pub fn is_valid_base64(data: &[u8]) -> bool {
    if data.is_empty() {
        return true;
    }
    data.is_ascii() && STANDARD.decode(data).is_ok()
}
