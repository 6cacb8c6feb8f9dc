//! HTTP handlers for the diagnostics surface.
pub mod status;
