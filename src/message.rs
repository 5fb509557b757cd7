//! Wire-level message types.
//!
//! Outbound frames are `op`-tagged, inbound frames are `type`-tagged JSON
//! text. The pong reply is matched as a literal string before any JSON
//! parsing; see [`PONG_FRAME`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::LoginArgs;

/// Exact text of the venue's pong reply. Compared byte-for-byte, not parsed.
pub const PONG_FRAME: &str = r#"{"type": "pong"}"#;

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum MessageOut {
    Ping,
    Login {
        args: LoginArgs,
    },
    Subscribe {
        #[serde(skip_serializing_if = "Option::is_none")]
        market: Option<String>,
        channel: String,
    },
}

impl MessageOut {
    pub fn subscribe(channel: impl Into<String>, market: Option<&str>) -> Self {
        MessageOut::Subscribe {
            market: market.map(Into::into),
            channel: channel.into(),
        }
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// Parsed inbound frame, classified by its `type` discriminator.
///
/// Anything the client does not understand lands in `Unknown` and is logged
/// rather than raised.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageIn {
    Pong,
    Subscribed {
        #[serde(default)]
        market: Option<String>,
        channel: String,
    },
    Update {
        #[serde(default)]
        market: Option<String>,
        channel: String,
        data: Value,
    },
    Partial {
        #[serde(default)]
        market: Option<String>,
        channel: String,
        data: Value,
    },
    #[serde(other)]
    Unknown,
}
