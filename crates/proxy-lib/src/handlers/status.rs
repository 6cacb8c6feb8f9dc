// ============================
// proxy-lib/src/handlers/status.rs
// ============================
//! Read-only status surface for operators, plus force-retire.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::messages::RoomStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_rooms: usize,
    pub total_clients: usize,
    pub rooms: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomsResponse {
    pub total_rooms: usize,
    pub rooms: Vec<RoomStatus>,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let rooms = state.registry.league_ids();
    Json(HealthResponse {
        status: "ok",
        active_rooms: rooms.len(),
        total_clients: state.registry.total_clients().await,
        rooms,
    })
}

pub async fn list_rooms(State(state): State<Arc<AppState>>) -> Json<RoomsResponse> {
    let rooms = state.registry.statuses().await;
    Json(RoomsResponse {
        total_rooms: rooms.len(),
        rooms,
    })
}

pub async fn room_status(
    State(state): State<Arc<AppState>>,
    Path(league_id): Path<String>,
) -> Result<Json<RoomStatus>, AppError> {
    let room = state
        .registry
        .get(&league_id)
        .ok_or_else(|| AppError::RoomNotFound(league_id.clone()))?;
    // A room whose actor already stopped is indistinguishable from absent.
    let status = room
        .status()
        .await
        .map_err(|_| AppError::RoomNotFound(league_id))?;
    Ok(Json(status))
}

pub async fn force_retire(
    State(state): State<Arc<AppState>>,
    Path(league_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.registry.force_retire(&league_id).await?;
    info!(league_id, "room force-retired");
    Ok(Json(serde_json::json!({
        "status": "ok",
        "leagueId": league_id,
    })))
}
