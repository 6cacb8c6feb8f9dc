// ============================
// proxy-lib/src/ws_router.rs
// ============================
//! Connection acceptor and router assembly.
//!
//! Downstream clients connect on a fixed path with their league id, draft
//! position, and upstream URL as query parameters. Parameter validation
//! happens before the room is touched; a bad handshake completes the upgrade
//! and is immediately closed with policy code 1008 so browsers can read the
//! reason.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    routing::{delete, get},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::status;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION, WS_DISCONNECTION, WS_REJECTED};
use crate::room::{RoomArgs, RoomClient};
use crate::session::ClientSession;
use crate::AppState;

pub const WS_PATH: &str = "/yahoo/websocket/connection";
pub const MISSING_PARAMS_REASON: &str =
    "Missing required parameters: leagueId, draftPosition, websocketUrl";

const CLOSE_CODE_POLICY_VIOLATION: u16 = 1008;

/// Validated query parameters of a downstream handshake.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub league_id: String,
    pub draft_position: u32,
    pub upstream_url: String,
    pub platform_user_id: String,
}

impl ConnectParams {
    /// Validate the handshake query. `leagueId` and `websocketUrl` must be
    /// non-empty; `draftPosition` must parse as an integer ≥ 1.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self, AppError> {
        let league_id = query.get("leagueId").filter(|s| !s.is_empty());
        let upstream_url = query.get("websocketUrl").filter(|s| !s.is_empty());
        let draft_position = query
            .get("draftPosition")
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|p| *p >= 1);

        match (league_id, draft_position, upstream_url) {
            (Some(league_id), Some(draft_position), Some(upstream_url)) => Ok(Self {
                league_id: league_id.clone(),
                draft_position,
                upstream_url: upstream_url.clone(),
                platform_user_id: query
                    .get("platformUserId")
                    .filter(|s| !s.is_empty())
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
            }),
            _ => Err(AppError::InvalidHandshake(MISSING_PARAMS_REASON.to_string())),
        }
    }

    fn room_args(&self) -> RoomArgs {
        RoomArgs {
            league_id: self.league_id.clone(),
            upstream_url: self.upstream_url.clone(),
            platform_user_id: self.platform_user_id.clone(),
            draft_position: self.draft_position,
        }
    }
}

/// Create the application router: the WebSocket endpoint plus the
/// diagnostics surface.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_handler))
        .route("/health", get(status::health))
        .route("/rooms", get(status::list_rooms))
        .route("/rooms/{league_id}/status", get(status::room_status))
        .route("/rooms/{league_id}", delete(status::force_retire))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let params = ConnectParams::from_query(&query);
    ws.on_upgrade(move |socket| handle_connection(socket, state, params))
}

async fn reject(mut socket: WebSocket, error: &AppError) {
    counter!(WS_REJECTED).increment(1);
    warn!(error = %error, "rejecting downstream connection");
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_CODE_POLICY_VIOLATION,
            reason: Utf8Bytes::from_static(MISSING_PARAMS_REASON),
        })))
        .await;
}

async fn handle_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    params: Result<ConnectParams, AppError>,
) {
    let params = match params {
        Ok(params) => params,
        Err(error) => {
            reject(socket, &error).await;
            return;
        }
    };

    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);

    let session_id = Uuid::new_v4();
    info!(
        %session_id,
        league_id = %params.league_id,
        draft_position = params.draft_position,
        platform_user_id = %params.platform_user_id,
        "downstream client connected"
    );

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Writer task: drains the session channel so a slow socket never blocks
    // the room actor.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let args = params.room_args();
    state.registry.swap_if_url_changed(&args).await;

    let client = RoomClient {
        id: session_id,
        draft_position: params.draft_position,
        tx: tx.clone(),
    };

    let (mut room, _) = state.registry.get_or_create(&args);
    if room
        .add_client(client.clone(), params.platform_user_id.clone())
        .await
        .is_err()
    {
        // Lost a race against room retirement; take a fresh room.
        let (fresh, _) = state.registry.get_or_create(&args);
        room = fresh;
        if room
            .add_client(client, params.platform_user_id.clone())
            .await
            .is_err()
        {
            warn!(%session_id, league_id = %params.league_id, "room unavailable, dropping connection");
            gauge!(WS_ACTIVE).decrement(1.0);
            writer.abort();
            return;
        }
    }

    let session = ClientSession::new(session_id, room, tx);

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => session.handle_text(text.as_str()).await,
            Message::Close(_) => break,
            _ => {}
        }
    }

    session.finish();
    info!(%session_id, league_id = %params.league_id, "downstream client disconnected");
    counter!(WS_DISCONNECTION).increment(1);
    gauge!(WS_ACTIVE).decrement(1.0);
    writer.abort();
}
