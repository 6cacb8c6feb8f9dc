// ============================
// proxy-lib/src/lib.rs
// ============================
//! Core library for the Yahoo draft WebSocket proxy.
//!
//! The proxy multiplexes many downstream draft clients onto one shared
//! upstream WebSocket per league. Downstream browsers cannot dial the
//! upstream themselves because of Origin restrictions; the proxy dials it
//! origin-less on their behalf and fans frames out to every client in the
//! room.

pub mod config;
pub mod error;
pub mod handlers;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod session;
pub mod upstream;
pub mod ws_router;

use std::sync::Arc;

use crate::config::Settings;
use crate::registry::RoomRegistry;

/// Application state shared across all handlers
pub struct AppState {
    /// Settings manager
    pub settings: Arc<Settings>,
    /// Process-wide league-to-room mapping
    pub registry: Arc<RoomRegistry>,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings) -> Self {
        let settings = Arc::new(settings);
        Self {
            registry: RoomRegistry::new(settings.clone()),
            settings,
        }
    }
}
