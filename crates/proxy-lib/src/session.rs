//! Client Session: one accepted downstream WebSocket.
//!
//! A session interprets inbound frames (typed control objects first, raw
//! upstream passthrough otherwise) and routes them to its room. It belongs
//! to exactly one room for its whole lifetime.

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::messages::{self, decode_client_frame, ClientMessage, Decoded, ServerMessage};
use crate::room::RoomHandle;

pub struct ClientSession {
    id: Uuid,
    room: RoomHandle,
    tx: mpsc::UnboundedSender<Message>,
}

impl ClientSession {
    pub fn new(id: Uuid, room: RoomHandle, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { id, room, tx }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Interpret one inbound text frame.
    pub async fn handle_text(&self, text: &str) {
        match decode_client_frame(text) {
            Decoded::Control(ClientMessage::YahooMessage { data }) => {
                self.room.send_upstream(data);
            }
            Decoded::Control(ClientMessage::YahooReconnect { data }) => {
                if let Err(e) = self
                    .room
                    .reconnect(data.league_id, data.draft_position)
                    .await
                {
                    warn!(
                        session_id = %self.id,
                        league_id = %self.room.league_id(),
                        error = %e,
                        "reconnect request failed"
                    );
                    self.send(&ServerMessage::YahooError {
                        error: messages::RECONNECT_FAILED_ERROR.to_string(),
                    });
                }
            }
            Decoded::Ignored(tag) => {
                debug!(session_id = %self.id, msg_type = %tag, "ignoring unrecognized control frame");
            }
            Decoded::Passthrough => {
                self.room.send_upstream(text.to_string());
            }
        }
    }

    /// Send a proxy message to this session only.
    pub fn send(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => {
                let _ = self.tx.send(Message::Text(json.into()));
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to serialize session message");
            }
        }
    }

    /// Detach from the room after the downstream socket closed.
    pub fn finish(&self) {
        self.room.remove_client(self.id);
    }
}
