use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message received from a chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Transport identifier (e.g. "discord", "signal").
    pub platform: String,
    /// Channel/chat identifier within the transport.
    pub channel: String,
    /// Sender identifier (transport-specific).
    pub user_id: String,
    /// Display name of the sender, if the transport provides one.
    #[serde(default)]
    pub user_name: String,
    /// Text content.
    pub content: String,
    /// Transport-specific message id, used for threaded replies.
    #[serde(default)]
    pub message_id: String,
    /// Attachments (images, files, audio, etc.)
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub timestamp: DateTime<Utc>,
}

impl IncomingMessage {
    /// Create a plain text message with the current timestamp.
    pub fn text(
        platform: impl Into<String>,
        channel: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            channel: channel.into(),
            user_id: user_id.into(),
            user_name: String::new(),
            content: content.into(),
            message_id: String::new(),
            attachments: vec![],
            timestamp: Utc::now(),
        }
    }
}

/// A message to deliver via a chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub platform: String,
    pub channel: String,
    pub content: String,
    /// Message id to reply to, when the transport supports threading.
    pub reply_to: Option<String>,
}

impl OutgoingMessage {
    pub fn new(
        platform: impl Into<String>,
        channel: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            channel: channel.into(),
            content: content.into(),
            reply_to: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub media_type: String,
    /// URL or base64 data, transport-dependent.
    pub data: String,
}
