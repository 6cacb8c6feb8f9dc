//! Room actor: one isolated tokio task per league.
//!
//! A room owns the upstream link and the set of downstream clients that share
//! a league id. All state lives inside the actor task and is only reachable
//! through a [`RoomHandle`], so client joins, leaves, reconnect requests,
//! upstream events, and the retirement timer can never interleave.
//!
//! The room never redials the upstream on its own. A fresh link is dialed
//! when a client joins (forcing every current client to observe the
//! upstream's initialization burst) or when a client explicitly asks for a
//! reconnect.

use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{CloseFrame, Message};
use metrics::counter;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::AppError;
use crate::messages::{self, RoomStatus, ServerMessage};
use crate::metrics::{ROOM_RETIRED, UPSTREAM_CONNECTED, UPSTREAM_FRAMES};
use crate::registry::RoomRegistry;
use crate::upstream::{UpstreamEvent, UpstreamLink};

/// How long a room survives with no clients before it is retired.
pub const RETIREMENT_GRACE: Duration = Duration::from_secs(2);

pub const FORCED_RECONNECT_REASON: &str = "New client joined — forcing reconnection";
pub const CLIENT_RECONNECT_REASON: &str = "Client-initiated reconnection";
pub const ROOM_RETIRED_REASON: &str = "Room retired";
pub const FORCE_CLEANUP_REASON: &str = "Room force cleanup";
pub const SERVER_SHUTDOWN_REASON: &str = "Server shutdown";

const CLOSE_CODE_NORMAL: u16 = 1000;
const CLOSE_CODE_GOING_AWAY: u16 = 1001;

/// Identity and dial parameters for a room.
#[derive(Debug, Clone)]
pub struct RoomArgs {
    pub league_id: String,
    pub upstream_url: String,
    pub platform_user_id: String,
    pub draft_position: u32,
}

/// A downstream client as the room sees it: an id, a draft position, and the
/// outbound channel drained by the connection's writer task.
#[derive(Debug, Clone)]
pub struct RoomClient {
    pub id: Uuid,
    pub draft_position: u32,
    pub tx: mpsc::UnboundedSender<Message>,
}

pub(crate) enum RoomMsg {
    AddClient {
        client: RoomClient,
        platform_user_id: String,
        reply: oneshot::Sender<()>,
    },
    RemoveClient {
        session_id: Uuid,
    },
    SendUpstream {
        text: String,
    },
    Reconnect {
        league_id: String,
        draft_position: u32,
        reply: oneshot::Sender<Result<(), AppError>>,
    },
    Status {
        reply: oneshot::Sender<RoomStatus>,
    },
    ForceCleanup {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    RetireExpired {
        generation: u64,
    },
    HeartbeatTick {
        link: u64,
    },
}

/// Handle to a running room actor. Cheap to clone; the registry holds one
/// per league.
#[derive(Clone)]
pub struct RoomHandle {
    league_id: String,
    upstream_url: String,
    instance: u64,
    cmd_tx: mpsc::UnboundedSender<RoomMsg>,
}

impl RoomHandle {
    pub fn league_id(&self) -> &str {
        &self.league_id
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Add a client and wait for the room to acknowledge the join. Fails if
    /// the room retired before processing the request, in which case the
    /// caller should fetch a fresh room from the registry.
    pub async fn add_client(
        &self,
        client: RoomClient,
        platform_user_id: String,
    ) -> Result<(), AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomMsg::AddClient {
                client,
                platform_user_id,
                reply: reply_tx,
            })
            .map_err(|_| AppError::RoomUnavailable(self.league_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| AppError::RoomUnavailable(self.league_id.clone()))
    }

    pub fn remove_client(&self, session_id: Uuid) {
        let _ = self.cmd_tx.send(RoomMsg::RemoveClient { session_id });
    }

    /// Relay a client payload to the upstream socket (fire-and-forget; the
    /// room drops it with a warning if the upstream is not open).
    pub fn send_upstream(&self, text: String) {
        let _ = self.cmd_tx.send(RoomMsg::SendUpstream { text });
    }

    pub async fn reconnect(&self, league_id: String, draft_position: u32) -> Result<(), AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomMsg::Reconnect {
                league_id,
                draft_position,
                reply: reply_tx,
            })
            .map_err(|_| AppError::RoomUnavailable(self.league_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| AppError::RoomUnavailable(self.league_id.clone()))?
    }

    pub async fn status(&self) -> Result<RoomStatus, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(RoomMsg::Status { reply: reply_tx })
            .map_err(|_| AppError::RoomUnavailable(self.league_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| AppError::RoomUnavailable(self.league_id.clone()))
    }

    /// Close every session (1001 "Room force cleanup"), drop the upstream,
    /// and remove the room from the registry.
    pub async fn force_cleanup(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(RoomMsg::ForceCleanup { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }

    /// Process-shutdown variant of cleanup (1001 "Server shutdown").
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(RoomMsg::Shutdown { reply: reply_tx })
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

/// Spawn a room actor task and return its handle.
pub(crate) fn spawn_room(
    args: RoomArgs,
    settings: Arc<Settings>,
    registry: Weak<RoomRegistry>,
    instance: u64,
) -> RoomHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let actor = RoomActor {
        league_id: args.league_id.clone(),
        upstream_url: args.upstream_url.clone(),
        platform_user_id: args.platform_user_id,
        primary_draft_position: args.draft_position,
        clients: Vec::new(),
        upstream: None,
        link_seq: 0,
        has_sent_join: false,
        intentional_disconnect: false,
        last_heartbeat: None,
        reconnect_attempts: 0,
        retire_generation: 0,
        retire_task: None,
        heartbeat_task: None,
        settings,
        registry,
        instance,
        cmd_tx: cmd_tx.clone(),
        cmd_rx,
        events_tx,
        events_rx,
    };

    tokio::spawn(actor.run());

    RoomHandle {
        league_id: args.league_id,
        upstream_url: args.upstream_url,
        instance,
        cmd_tx,
    }
}

enum Flow {
    Continue,
    Stop,
}

struct RoomActor {
    league_id: String,
    upstream_url: String,
    platform_user_id: String,
    primary_draft_position: u32,
    /// Insertion order is broadcast order and status order.
    clients: Vec<RoomClient>,
    upstream: Option<UpstreamLink>,
    link_seq: u64,
    has_sent_join: bool,
    intentional_disconnect: bool,
    last_heartbeat: Option<u64>,
    /// Reset on every successful open; no policy increments it.
    reconnect_attempts: u32,
    retire_generation: u64,
    retire_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    settings: Arc<Settings>,
    registry: Weak<RoomRegistry>,
    instance: u64,
    cmd_tx: mpsc::UnboundedSender<RoomMsg>,
    cmd_rx: mpsc::UnboundedReceiver<RoomMsg>,
    events_tx: mpsc::UnboundedSender<UpstreamEvent>,
    events_rx: mpsc::UnboundedReceiver<UpstreamEvent>,
}

impl RoomActor {
    async fn run(mut self) {
        info!(league_id = %self.league_id, "room started");

        loop {
            let flow = tokio::select! {
                msg = self.cmd_rx.recv() => match msg {
                    Some(msg) => self.handle_msg(msg),
                    None => Flow::Stop,
                },
                event = self.events_rx.recv() => match event {
                    Some(event) => {
                        self.handle_upstream_event(event);
                        Flow::Continue
                    }
                    None => Flow::Continue,
                },
            };
            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        self.stop_heartbeat();
        if let Some(task) = self.retire_task.take() {
            task.abort();
        }
        info!(league_id = %self.league_id, "room stopped");
    }

    fn handle_msg(&mut self, msg: RoomMsg) -> Flow {
        match msg {
            RoomMsg::AddClient {
                client,
                platform_user_id,
                reply,
            } => {
                self.handle_add_client(client, platform_user_id);
                let _ = reply.send(());
                Flow::Continue
            }
            RoomMsg::RemoveClient { session_id } => {
                self.handle_remove_client(session_id);
                Flow::Continue
            }
            RoomMsg::SendUpstream { text } => {
                self.handle_send_upstream(text);
                Flow::Continue
            }
            RoomMsg::Reconnect {
                league_id,
                draft_position,
                reply,
            } => {
                let _ = reply.send(self.handle_reconnect(league_id, draft_position));
                Flow::Continue
            }
            RoomMsg::Status { reply } => {
                let _ = reply.send(self.status());
                Flow::Continue
            }
            RoomMsg::HeartbeatTick { link } => {
                self.handle_heartbeat_tick(link);
                Flow::Continue
            }
            RoomMsg::RetireExpired { generation } => self.handle_retire_expired(generation),
            RoomMsg::ForceCleanup { reply } => {
                self.cleanup(FORCE_CLEANUP_REASON);
                let _ = reply.send(());
                Flow::Stop
            }
            RoomMsg::Shutdown { reply } => {
                self.cleanup(SERVER_SHUTDOWN_REASON);
                let _ = reply.send(());
                Flow::Stop
            }
        }
    }

    fn handle_add_client(&mut self, client: RoomClient, platform_user_id: String) {
        self.cancel_retirement(true);

        let link_open = self.upstream.as_ref().is_some_and(UpstreamLink::is_open);
        if !self.clients.is_empty() || link_open {
            // The upstream emits its initialization burst once per join, so
            // every arrival forces a fresh connection for the whole room.
            self.teardown_link(FORCED_RECONNECT_REASON);
        }

        // The join identity follows the most recent arrival.
        self.primary_draft_position = client.draft_position;
        self.platform_user_id = platform_user_id;

        info!(
            league_id = %self.league_id,
            session_id = %client.id,
            draft_position = client.draft_position,
            clients = self.clients.len() + 1,
            "client joined room"
        );

        let joined = ServerMessage::RoomJoined {
            room_id: self.league_id.clone(),
            yahoo_connected: false,
            clients_count: self.clients.len() + 1,
            draft_position: client.draft_position,
        };
        self.clients.push(client);

        self.connect_fresh();

        if let Some(newest) = self.clients.last() {
            Self::send_to(newest, &joined);
        }
    }

    fn handle_remove_client(&mut self, session_id: Uuid) {
        let before = self.clients.len();
        self.clients.retain(|c| c.id != session_id);
        if self.clients.len() == before {
            return;
        }

        info!(
            league_id = %self.league_id,
            %session_id,
            clients = self.clients.len(),
            "client left room"
        );

        if self.clients.is_empty() {
            self.schedule_retirement();
        }
    }

    fn handle_send_upstream(&mut self, text: String) {
        match self.upstream.as_ref() {
            Some(link) if link.is_open() => {
                if let Err(e) = link.send(text) {
                    warn!(league_id = %self.league_id, error = %e, "failed to relay frame upstream");
                }
            }
            _ => {
                warn!(league_id = %self.league_id, "dropping client frame, upstream not open");
            }
        }
    }

    fn handle_reconnect(
        &mut self,
        league_id: String,
        draft_position: u32,
    ) -> Result<(), AppError> {
        if league_id != self.league_id {
            return Err(AppError::LeagueMismatch {
                room: self.league_id.clone(),
                requested: league_id,
            });
        }

        if draft_position != self.primary_draft_position {
            self.primary_draft_position = draft_position;
        }

        info!(
            league_id = %self.league_id,
            draft_position,
            "client requested upstream reconnection"
        );

        self.teardown_link(CLIENT_RECONNECT_REASON);
        self.connect_fresh();
        Ok(())
    }

    fn handle_retire_expired(&mut self, generation: u64) -> Flow {
        // A stale timer (cancelled by a join that raced the expiry) is a no-op.
        if generation != self.retire_generation || !self.clients.is_empty() {
            return Flow::Continue;
        }

        info!(league_id = %self.league_id, "retiring room after grace period");
        self.intentional_disconnect = true;
        if let Some(mut link) = self.upstream.take() {
            link.close(CLOSE_CODE_NORMAL, ROOM_RETIRED_REASON, true);
        }
        self.stop_heartbeat();
        self.retire_task = None;
        self.remove_from_registry();
        counter!(ROOM_RETIRED).increment(1);
        Flow::Stop
    }

    fn handle_heartbeat_tick(&mut self, link_id: u64) {
        let Some(link) = self.upstream.as_ref() else {
            return;
        };
        if link.id() != link_id || !link.is_open() {
            return;
        }
        match link.send(messages::HEARTBEAT_FRAME.to_string()) {
            Ok(()) => {
                self.last_heartbeat = Some(now_millis());
                debug!(league_id = %self.league_id, "heartbeat sent");
            }
            Err(e) => {
                warn!(league_id = %self.league_id, error = %e, "failed to send heartbeat");
            }
        }
    }

    fn handle_upstream_event(&mut self, event: UpstreamEvent) {
        let current = self.upstream.as_ref().map(UpstreamLink::id);
        match event {
            UpstreamEvent::Open { link } => {
                if current != Some(link) {
                    return;
                }
                if let Some(l) = self.upstream.as_mut() {
                    l.mark_open();
                }
                self.reconnect_attempts = 0;
                self.has_sent_join = false;
                counter!(UPSTREAM_CONNECTED).increment(1);
                info!(league_id = %self.league_id, link, "upstream connected");
                self.send_join_frame();
                self.start_heartbeat(link);
                self.broadcast(&ServerMessage::YahooConnected {
                    message: messages::CONNECTED_MESSAGE.to_string(),
                });
            }
            UpstreamEvent::Frame { link, text } => {
                if current != Some(link) {
                    return;
                }
                counter!(UPSTREAM_FRAMES).increment(1);
                self.broadcast(&ServerMessage::YahooMessage { data: text });
            }
            UpstreamEvent::Error { link, error } => {
                if current != Some(link) {
                    return;
                }
                warn!(league_id = %self.league_id, link, error = %error, "upstream error");
                self.broadcast(&ServerMessage::YahooError {
                    error: error.to_string(),
                });
            }
            UpstreamEvent::Closed { link, code, reason } => {
                if current != Some(link) {
                    return;
                }
                if let Some(l) = self.upstream.as_mut() {
                    l.mark_closed();
                }
                self.upstream = None;
                self.stop_heartbeat();
                self.has_sent_join = false;
                info!(
                    league_id = %self.league_id,
                    link,
                    code,
                    reason = %reason,
                    "upstream disconnected"
                );
                self.broadcast(&ServerMessage::YahooDisconnected { code, reason });
                // No redial here: only a client join or an explicit reconnect
                // request dials again.
            }
        }
    }

    /// Close and drop the current link, notifying clients if it was open,
    /// and reset the join state so the next open re-sends the join frame.
    fn teardown_link(&mut self, reason: &'static str) {
        if let Some(mut link) = self.upstream.take() {
            let was_open = link.is_open();
            info!(league_id = %self.league_id, link = link.id(), reason, "closing upstream link");
            link.close(CLOSE_CODE_NORMAL, reason, true);
            if was_open {
                self.broadcast(&ServerMessage::YahooDisconnected {
                    code: CLOSE_CODE_NORMAL,
                    reason: reason.to_string(),
                });
            }
        }
        self.stop_heartbeat();
        self.has_sent_join = false;
        self.intentional_disconnect = false;
    }

    /// Dial a brand-new link instance, superseding whatever came before.
    fn connect_fresh(&mut self) {
        if let Some(mut link) = self.upstream.take() {
            // A link still mid-dial is superseded outright.
            link.close(CLOSE_CODE_NORMAL, FORCED_RECONNECT_REASON, true);
        }
        self.link_seq += 1;
        let mut link = UpstreamLink::new(
            self.link_seq,
            self.upstream_url.clone(),
            messages::PROXY_USER_AGENT.to_string(),
            self.settings.dial_timeout(),
            self.events_tx.clone(),
        );
        link.connect();
        self.upstream = Some(link);
    }

    fn send_join_frame(&mut self) {
        if self.has_sent_join {
            return;
        }
        let frame = messages::join_frame(
            &self.league_id,
            self.primary_draft_position,
            &self.platform_user_id,
        );
        match self.upstream.as_ref().map(|l| l.send(frame)) {
            Some(Ok(())) => {
                self.has_sent_join = true;
                debug!(
                    league_id = %self.league_id,
                    draft_position = self.primary_draft_position,
                    "join frame sent"
                );
            }
            Some(Err(e)) => {
                warn!(league_id = %self.league_id, error = %e, "failed to send join frame");
            }
            None => {}
        }
    }

    fn schedule_retirement(&mut self) {
        self.cancel_retirement(false);
        let generation = self.retire_generation;
        let tx = self.cmd_tx.clone();
        info!(
            league_id = %self.league_id,
            grace_ms = RETIREMENT_GRACE.as_millis() as u64,
            "room empty, scheduling retirement"
        );
        self.retire_task = Some(tokio::spawn(async move {
            tokio::time::sleep(RETIREMENT_GRACE).await;
            let _ = tx.send(RoomMsg::RetireExpired { generation });
        }));
    }

    fn cancel_retirement(&mut self, log: bool) {
        self.retire_generation += 1;
        if let Some(task) = self.retire_task.take() {
            task.abort();
            if log {
                info!(league_id = %self.league_id, "cancelled pending retirement");
            }
        }
    }

    fn start_heartbeat(&mut self, link: u64) {
        self.stop_heartbeat();
        let tx = self.cmd_tx.clone();
        let period = self.settings.heartbeat_period();
        self.heartbeat_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick of an interval fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if tx.send(RoomMsg::HeartbeatTick { link }).is_err() {
                    break;
                }
            }
        }));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
    }

    fn cleanup(&mut self, reason: &str) {
        info!(league_id = %self.league_id, reason, "cleaning up room");
        self.close_clients(CLOSE_CODE_GOING_AWAY, reason);
        if let Some(mut link) = self.upstream.take() {
            link.close(CLOSE_CODE_NORMAL, reason, true);
        }
        self.intentional_disconnect = true;
        self.stop_heartbeat();
        self.cancel_retirement(false);
        self.remove_from_registry();
    }

    fn close_clients(&mut self, code: u16, reason: &str) {
        for client in self.clients.drain(..) {
            let _ = client.tx.send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.to_string().into(),
            })));
        }
    }

    fn broadcast(&self, msg: &ServerMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => {
                for client in &self.clients {
                    let _ = client.tx.send(Message::Text(json.clone().into()));
                }
            }
            Err(e) => {
                warn!(league_id = %self.league_id, error = %e, "failed to serialize broadcast");
            }
        }
    }

    fn send_to(client: &RoomClient, msg: &ServerMessage) {
        if let Ok(json) = serde_json::to_string(msg) {
            let _ = client.tx.send(Message::Text(json.into()));
        }
    }

    fn remove_from_registry(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_room(&self.league_id, self.instance);
        }
    }

    fn status(&self) -> RoomStatus {
        RoomStatus {
            room_id: self.league_id.clone(),
            league_id: self.league_id.clone(),
            draft_position: self.primary_draft_position,
            platform_user_id: self.platform_user_id.clone(),
            clients_count: self.clients.len(),
            client_draft_positions: self.clients.iter().map(|c| c.draft_position).collect(),
            yahoo_connected: self.upstream.as_ref().is_some_and(UpstreamLink::is_open),
            has_joined: self.has_sent_join,
            last_heartbeat: self.last_heartbeat,
            reconnect_attempts: self.reconnect_attempts,
            is_intentional_disconnect: self.intentional_disconnect,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
