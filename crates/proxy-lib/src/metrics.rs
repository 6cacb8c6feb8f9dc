// ==============
// crates/proxy-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_DISCONNECTION: &str = "ws.disconnection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_REJECTED: &str = "ws.rejected";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_RETIRED: &str = "room.retired";
pub const UPSTREAM_CONNECTED: &str = "upstream.connected";
pub const UPSTREAM_FRAMES: &str = "upstream.frames";
