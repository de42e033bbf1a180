use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Permission ladder for users and tools. Comparisons use the numeric order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    #[default]
    Public = 0,
    Trusted = 1,
    Operator = 2,
    Admin = 3,
}

impl PermissionLevel {
    pub fn from_u8(level: u8) -> Self {
        match level {
            3.. => Self::Admin,
            2 => Self::Operator,
            1 => Self::Trusted,
            0 => Self::Public,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Trusted => "trusted",
            Self::Operator => "operator",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PermissionLevel {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "trusted" => Ok(Self::Trusted),
            "operator" => Ok(Self::Operator),
            "admin" => Ok(Self::Admin),
            _ => Err(()),
        }
    }
}

/// A `"platform:channel"` pair identifying where a message should land.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelTarget {
    pub platform: String,
    pub channel: String,
}

impl ChannelTarget {
    /// Parse `"platform:channel"`. Both halves must be non-empty; the
    /// channel half may itself contain colons.
    pub fn parse(s: &str) -> Option<Self> {
        let (platform, channel) = s.split_once(':')?;
        if platform.is_empty() || channel.is_empty() {
            return None;
        }
        Some(Self {
            platform: platform.to_string(),
            channel: channel.to_string(),
        })
    }
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.platform, self.channel)
    }
}

/// A normalized webhook event, produced by the webhook server from a raw
/// provider payload and carried over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Provider family: "github", "sentry", or "generic".
    pub source: String,
    /// Provider-specific event type (e.g. "push", "alert").
    pub event_type: String,
    /// Human-readable one-line summary.
    pub summary: String,
    /// The raw JSON payload.
    pub payload: Value,
    /// Destination as `"platform:channel"`.
    pub channel_target: String,
}
