//! Downstream control protocol and upstream wire frames.
//!
//! Downstream clients speak JSON text frames tagged by `type`; anything that
//! is not a recognized control object is treated as a raw upstream payload
//! and forwarded verbatim. Upstream frames the proxy itself emits (join,
//! heartbeat) are composed here so the formats live in one place.

use percent_encoding::{utf8_percent_encode, AsciiSet};
use serde::{Deserialize, Serialize};

/// User agent presented to the upstream server, both on the dial and inside
/// the join frame.
pub const PROXY_USER_AGENT: &str = "YahooFantasyProxy/1.0";

/// Single-character keepalive frame expected by the upstream.
pub const HEARTBEAT_FRAME: &str = "c";

/// Notice broadcast to a room when the upstream handshake completes.
pub const CONNECTED_MESSAGE: &str = "Connected to Yahoo WebSocket";

/// Error surfaced to a client whose reconnect request was rejected.
pub const RECONNECT_FAILED_ERROR: &str = "Failed to reconnect to Yahoo";

/// Messages a downstream client may send to the proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Relay `data` to the upstream socket verbatim.
    YahooMessage { data: String },
    /// Tear down the room's upstream link and dial a fresh one.
    YahooReconnect { data: ReconnectRequest },
}

/// Payload of a `yahoo_reconnect` control frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectRequest {
    pub league_id: String,
    pub draft_position: u32,
}

/// Messages the proxy sends to downstream clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    RoomJoined {
        room_id: String,
        yahoo_connected: bool,
        clients_count: usize,
        draft_position: u32,
    },
    YahooConnected {
        message: String,
    },
    YahooMessage {
        data: String,
    },
    YahooDisconnected {
        code: u16,
        reason: String,
    },
    YahooError {
        error: String,
    },
    /// Reserved for a future automatic reconnection policy; never emitted
    /// today.
    YahooMaxReconnectReached {
        attempts: u32,
    },
}

/// Outcome of interpreting a downstream text frame.
#[derive(Debug)]
pub enum Decoded {
    /// A recognized control message.
    Control(ClientMessage),
    /// A JSON object with an unrecognized or malformed `type`; dropped.
    Ignored(String),
    /// Not a typed JSON object; forward the raw frame upstream.
    Passthrough,
}

/// Interpret a downstream frame: first as a typed control object, falling
/// back to raw upstream passthrough for anything else.
pub fn decode_client_frame(text: &str) -> Decoded {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Decoded::Passthrough,
    };
    let Some(tag) = value.get("type").and_then(|t| t.as_str()) else {
        return Decoded::Passthrough;
    };
    let tag = tag.to_string();
    match serde_json::from_value::<ClientMessage>(value) {
        Ok(msg) => Decoded::Control(msg),
        Err(_) => Decoded::Ignored(tag),
    }
}

/// Per-room status snapshot served by the diagnostics endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatus {
    pub room_id: String,
    pub league_id: String,
    pub draft_position: u32,
    pub platform_user_id: String,
    pub clients_count: usize,
    pub client_draft_positions: Vec<u32>,
    pub yahoo_connected: bool,
    pub has_joined: bool,
    /// Milliseconds since the Unix epoch of the last heartbeat sent.
    pub last_heartbeat: Option<u64>,
    pub reconnect_attempts: u32,
    pub is_intentional_disconnect: bool,
}

/// Characters escaped the way `encodeURIComponent` escapes them: everything
/// except ASCII alphanumerics and `-_.!~*'()`.
const URI_COMPONENT: &AsciiSet = &percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// User agent embedded in the join frame for a given platform user.
pub fn join_user_agent(platform_user_id: &str) -> String {
    format!("{PROXY_USER_AGENT} ({platform_user_id})")
}

/// Compose the upstream join frame:
/// `8|<leagueId>|<draftPosition>|<percent-encoded user-agent>|`
pub fn join_frame(league_id: &str, draft_position: u32, platform_user_id: &str) -> String {
    let agent = join_user_agent(platform_user_id);
    let encoded = utf8_percent_encode(&agent, URI_COMPONENT);
    format!("8|{league_id}|{draft_position}|{encoded}|")
}
