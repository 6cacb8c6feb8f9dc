// ============================
// crates/proxy-lib/tests/proxy_flow_tests.rs
// ============================
//! End-to-end tests: real proxy server, real downstream WebSocket clients,
//! and an in-process stub standing in for the Yahoo upstream.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use proxy_lib::config::Settings;
use proxy_lib::handlers::status;
use proxy_lib::ws_router::{create_router, WS_PATH};
use proxy_lib::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Something the stub upstream observed.
#[derive(Debug)]
enum StubEvent {
    Connected {
        conn: usize,
        origin: Option<String>,
        user_agent: Option<String>,
    },
    Frame {
        conn: usize,
        text: String,
    },
    Closed {
        conn: usize,
        code: Option<u16>,
        reason: String,
    },
}

/// An in-process WebSocket server standing in for the Yahoo draft service.
/// Captures handshake headers, reports every received frame and close, and
/// can inject frames into the most recent connection.
struct UpstreamStub {
    url: String,
    events: mpsc::UnboundedReceiver<StubEvent>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl UpstreamStub {
    async fn next_event(&mut self) -> StubEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for stub event")
            .expect("stub event channel closed")
    }

    /// Skip events until one matches the predicate.
    async fn wait_for(&mut self, what: &str, pred: impl Fn(&StubEvent) -> bool) -> StubEvent {
        for _ in 0..50 {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
        panic!("never observed stub event: {what}");
    }

    /// Send a text frame to the proxy over the current upstream connection.
    fn send(&self, text: &str) {
        let guard = self.outbound.lock().unwrap();
        guard
            .as_ref()
            .expect("no live upstream connection")
            .send(text.to_string())
            .expect("upstream connection task gone");
    }
}

async fn spawn_upstream_stub() -> UpstreamStub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (ev_tx, events) = mpsc::unbounded_channel();
    let outbound: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>> = Arc::new(Mutex::new(None));
    let outbound_for_task = outbound.clone();

    tokio::spawn(async move {
        let mut conn_count = 0usize;
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            conn_count += 1;
            let conn = conn_count;
            let ev_tx = ev_tx.clone();
            let outbound = outbound_for_task.clone();

            tokio::spawn(async move {
                let captured: Arc<Mutex<(Option<String>, Option<String>)>> =
                    Arc::new(Mutex::new((None, None)));
                let cap = captured.clone();
                let ws = match tokio_tungstenite::accept_hdr_async(
                    stream,
                    move |req: &Request, resp: Response| {
                        let origin = req
                            .headers()
                            .get("origin")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        let agent = req
                            .headers()
                            .get("user-agent")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        *cap.lock().unwrap() = (origin, agent);
                        Ok(resp)
                    },
                )
                .await
                {
                    Ok(ws) => ws,
                    Err(_) => return,
                };

                let (origin, user_agent) = captured.lock().unwrap().clone();
                let _ = ev_tx.send(StubEvent::Connected {
                    conn,
                    origin,
                    user_agent,
                });

                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
                *outbound.lock().unwrap() = Some(out_tx);

                let (mut sink, mut stream) = ws.split();
                loop {
                    tokio::select! {
                        msg = stream.next() => match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                let _ = ev_tx.send(StubEvent::Frame {
                                    conn,
                                    text: text.to_string(),
                                });
                            }
                            Some(Ok(WsMessage::Close(frame))) => {
                                let (code, reason) = match frame {
                                    Some(f) => (Some(u16::from(f.code)), f.reason.to_string()),
                                    None => (None, String::new()),
                                };
                                let _ = ev_tx.send(StubEvent::Closed { conn, code, reason });
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) | None => {
                                let _ = ev_tx.send(StubEvent::Closed {
                                    conn,
                                    code: None,
                                    reason: String::new(),
                                });
                                break;
                            }
                        },
                        out = out_rx.recv() => match out {
                            Some(text) => {
                                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            });
        }
    });

    UpstreamStub {
        url,
        events,
        outbound,
    }
}

/// Start the proxy on an ephemeral port.
async fn setup_proxy_with(settings: Settings) -> (String, Arc<AppState>) {
    let state = Arc::new(AppState::new(settings));
    let app = create_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn setup_proxy() -> (String, Arc<AppState>) {
    setup_proxy_with(Settings::default()).await
}

type ClientStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_client(addr: &str, query: &str) -> ClientStream {
    let url = format!("ws://{addr}{WS_PATH}?{query}");
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("failed to connect downstream client");
    ws
}

async fn next_message_with_timeout(
    stream: &mut ClientStream,
    timeout_secs: u64,
    operation_name: &str,
) -> WsMessage {
    match tokio::time::timeout(Duration::from_secs(timeout_secs), stream.next()).await {
        Ok(Some(Ok(msg))) => msg,
        Ok(Some(Err(e))) => panic!("{operation_name} failed with error: {e:?}"),
        Ok(None) => panic!("{operation_name} returned None (connection closed?)"),
        Err(e) => panic!("{operation_name} timed out after {timeout_secs} seconds: {e:?}"),
    }
}

async fn next_json(stream: &mut ClientStream, operation_name: &str) -> serde_json::Value {
    let msg = next_message_with_timeout(stream, 5, operation_name).await;
    match msg {
        WsMessage::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("{operation_name}: expected text frame, got {other:?}"),
    }
}

/// Read frames until one with the wanted `type` tag arrives.
async fn drain_until(stream: &mut ClientStream, wanted_type: &str) -> serde_json::Value {
    for _ in 0..50 {
        let value = next_json(stream, wanted_type).await;
        if value["type"] == wanted_type {
            return value;
        }
    }
    panic!("never received a {wanted_type} frame");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// Single client, normal flow: room created, origin-less dial, join frame,
/// room_joined and yahoo_connected delivered.
#[tokio::test]
async fn test_single_client_normal_flow() {
    let (addr, state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!(
        "leagueId=12345&draftPosition=1&websocketUrl={}&platformUserId=user-a",
        stub.url
    );
    let mut client = connect_client(&addr, &query).await;

    match stub.next_event().await {
        StubEvent::Connected {
            origin, user_agent, ..
        } => {
            assert!(origin.is_none(), "dial must not carry an Origin header");
            assert_eq!(user_agent.as_deref(), Some("YahooFantasyProxy/1.0"));
        }
        other => panic!("Expected Connected, got {other:?}"),
    }

    match stub.next_event().await {
        StubEvent::Frame { text, .. } => {
            assert_eq!(text, "8|12345|1|YahooFantasyProxy%2F1.0%20(user-a)|");
        }
        other => panic!("Expected join frame, got {other:?}"),
    }

    let joined = next_json(&mut client, "room_joined").await;
    assert_eq!(joined["type"], "room_joined");
    assert_eq!(joined["roomId"], "12345");
    assert_eq!(joined["yahooConnected"], false);
    assert_eq!(joined["clientsCount"], 1);
    assert_eq!(joined["draftPosition"], 1);

    let connected = drain_until(&mut client, "yahoo_connected").await;
    assert_eq!(connected["message"], "Connected to Yahoo WebSocket");

    assert_eq!(state.registry.room_count(), 1);
}

/// Upstream text frames are relayed verbatim, in order, wrapped in
/// yahoo_message.
#[tokio::test]
async fn test_upstream_message_relay_preserves_order() {
    let (addr, _state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!("leagueId=12345&draftPosition=1&websocketUrl={}", stub.url);
    let mut client = connect_client(&addr, &query).await;
    drain_until(&mut client, "yahoo_connected").await;

    stub.send("hello");
    stub.send("{\"draft\":\"started\"}");
    stub.send("third");

    let first = drain_until(&mut client, "yahoo_message").await;
    assert_eq!(first["data"], "hello");
    let second = next_json(&mut client, "second relay").await;
    assert_eq!(second["type"], "yahoo_message");
    assert_eq!(second["data"], "{\"draft\":\"started\"}");
    let third = next_json(&mut client, "third relay").await;
    assert_eq!(third["data"], "third");
}

/// Downstream frames reach the upstream: typed yahoo_message payloads and
/// raw non-JSON frames alike.
#[tokio::test]
async fn test_downstream_frames_are_forwarded_upstream() {
    let (addr, _state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!("leagueId=12345&draftPosition=1&websocketUrl={}", stub.url);
    let mut client = connect_client(&addr, &query).await;
    drain_until(&mut client, "yahoo_connected").await;
    stub.wait_for("join frame", |e| {
        matches!(e, StubEvent::Frame { text, .. } if text.starts_with("8|"))
    })
    .await;

    client
        .send(WsMessage::Text(
            "{\"type\":\"yahoo_message\",\"data\":\"json-relay\"}".into(),
        ))
        .await
        .unwrap();
    match stub.next_event().await {
        StubEvent::Frame { text, .. } => assert_eq!(text, "json-relay"),
        other => panic!("Expected relayed frame, got {other:?}"),
    }

    client
        .send(WsMessage::Text("2|12345|nominate|37".into()))
        .await
        .unwrap();
    match stub.next_event().await {
        StubEvent::Frame { text, .. } => assert_eq!(text, "2|12345|nominate|37"),
        other => panic!("Expected raw passthrough, got {other:?}"),
    }
}

/// A second client forces the upstream to reconnect so everyone observes a
/// fresh initialization burst; the join frame carries the newest identity.
#[tokio::test]
async fn test_second_client_forces_upstream_reinit() {
    let (addr, state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query_a = format!(
        "leagueId=12345&draftPosition=1&websocketUrl={}&platformUserId=user-a",
        stub.url
    );
    let mut client_a = connect_client(&addr, &query_a).await;
    drain_until(&mut client_a, "yahoo_connected").await;

    let query_b = format!(
        "leagueId=12345&draftPosition=3&websocketUrl={}&platformUserId=user-b",
        stub.url
    );
    let mut client_b = connect_client(&addr, &query_b).await;

    // Old link closed intentionally with code 1000 and the forced reason.
    let closed = stub
        .wait_for("forced close of first link", |e| {
            matches!(e, StubEvent::Closed { conn: 1, .. })
        })
        .await;
    match closed {
        StubEvent::Closed { code, reason, .. } => {
            assert_eq!(code, Some(1000));
            assert_eq!(reason, "New client joined — forcing reconnection");
        }
        _ => unreachable!(),
    }

    // A second link is dialed and joined with the new client's identity.
    let join = stub
        .wait_for("second join frame", |e| {
            matches!(e, StubEvent::Frame { conn: 2, text } if text.starts_with("8|"))
        })
        .await;
    match join {
        StubEvent::Frame { text, .. } => {
            assert_eq!(text, "8|12345|3|YahooFantasyProxy%2F1.0%20(user-b)|");
        }
        _ => unreachable!(),
    }

    // Both clients observe the reconnected upstream.
    let joined_b = drain_until(&mut client_b, "room_joined").await;
    assert_eq!(joined_b["clientsCount"], 2);
    assert_eq!(joined_b["draftPosition"], 3);
    drain_until(&mut client_b, "yahoo_connected").await;
    drain_until(&mut client_a, "yahoo_disconnected").await;
    drain_until(&mut client_a, "yahoo_connected").await;

    // Still one room, two sessions.
    assert_eq!(state.registry.room_count(), 1);
    let room_status = state
        .registry
        .get("12345")
        .unwrap()
        .status()
        .await
        .unwrap();
    assert_eq!(room_status.clients_count, 2);
    assert_eq!(room_status.client_draft_positions, vec![1, 3]);
}

/// Every upstream frame reaches every connected session exactly once.
#[tokio::test]
async fn test_broadcast_reaches_all_sessions_exactly_once() {
    let (addr, _state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query_a = format!("leagueId=555&draftPosition=1&websocketUrl={}", stub.url);
    let mut client_a = connect_client(&addr, &query_a).await;
    drain_until(&mut client_a, "yahoo_connected").await;

    let query_b = format!("leagueId=555&draftPosition=2&websocketUrl={}", stub.url);
    let mut client_b = connect_client(&addr, &query_b).await;
    drain_until(&mut client_b, "yahoo_connected").await;
    drain_until(&mut client_a, "yahoo_connected").await;

    stub.send("pick:37");

    let to_a = drain_until(&mut client_a, "yahoo_message").await;
    assert_eq!(to_a["data"], "pick:37");
    let to_b = drain_until(&mut client_b, "yahoo_message").await;
    assert_eq!(to_b["data"], "pick:37");

    // Exactly once: the next frame each client sees is a different payload.
    stub.send("pick:38");
    let next_a = drain_until(&mut client_a, "yahoo_message").await;
    assert_eq!(next_a["data"], "pick:38");
    let next_b = drain_until(&mut client_b, "yahoo_message").await;
    assert_eq!(next_b["data"], "pick:38");
}

/// A brief disconnect inside the grace window keeps the same room alive.
#[tokio::test]
async fn test_room_survives_brief_disconnect() {
    let (addr, state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!("leagueId=777&draftPosition=1&websocketUrl={}", stub.url);
    let mut client = connect_client(&addr, &query).await;
    drain_until(&mut client, "yahoo_connected").await;

    let instance_before = state.registry.get("777").unwrap().instance();
    client.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    // Reconnect before the 2 s grace period expires.
    let mut client2 = connect_client(&addr, &query).await;
    drain_until(&mut client2, "room_joined").await;

    assert_eq!(state.registry.room_count(), 1);
    let instance_after = state.registry.get("777").unwrap().instance();
    assert_eq!(instance_before, instance_after, "room must be reused");

    // The upstream close that did happen was the join-forced one, not a
    // retirement.
    let closed = stub
        .wait_for("close of first link", |e| {
            matches!(e, StubEvent::Closed { conn: 1, .. })
        })
        .await;
    match closed {
        StubEvent::Closed { reason, .. } => {
            assert_ne!(reason, "Room retired");
        }
        _ => unreachable!(),
    }
}

/// With no rejoin, the room is retired shortly after the grace period and
/// the upstream closed with code 1000.
#[tokio::test]
async fn test_room_retires_when_grace_period_expires() {
    let (addr, state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!("leagueId=777&draftPosition=1&websocketUrl={}", stub.url);
    let mut client = connect_client(&addr, &query).await;
    drain_until(&mut client, "yahoo_connected").await;
    assert_eq!(state.registry.room_count(), 1);

    client.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;

    assert_eq!(state.registry.room_count(), 0);
    let closed = stub
        .wait_for("retirement close", |e| {
            matches!(e, StubEvent::Closed { code: Some(1000), .. })
        })
        .await;
    match closed {
        StubEvent::Closed { reason, .. } => assert_eq!(reason, "Room retired"),
        _ => unreachable!(),
    }
}

/// Client-initiated reconnect: old link closed with 1000, new link joined
/// with the updated draft position.
#[tokio::test]
async fn test_client_initiated_reconnect() {
    let (addr, _state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!(
        "leagueId=12345&draftPosition=1&websocketUrl={}&platformUserId=user-a",
        stub.url
    );
    let mut client = connect_client(&addr, &query).await;
    drain_until(&mut client, "yahoo_connected").await;

    client
        .send(WsMessage::Text(
            "{\"type\":\"yahoo_reconnect\",\"data\":{\"leagueId\":\"12345\",\"draftPosition\":5}}"
                .into(),
        ))
        .await
        .unwrap();

    let closed = stub
        .wait_for("reconnect close", |e| {
            matches!(e, StubEvent::Closed { conn: 1, .. })
        })
        .await;
    match closed {
        StubEvent::Closed { code, reason, .. } => {
            assert_eq!(code, Some(1000));
            assert_eq!(reason, "Client-initiated reconnection");
        }
        _ => unreachable!(),
    }

    let join = stub
        .wait_for("fresh join frame", |e| {
            matches!(e, StubEvent::Frame { conn: 2, text } if text.starts_with("8|"))
        })
        .await;
    match join {
        StubEvent::Frame { text, .. } => {
            assert_eq!(text, "8|12345|5|YahooFantasyProxy%2F1.0%20(user-a)|");
        }
        _ => unreachable!(),
    }

    drain_until(&mut client, "yahoo_disconnected").await;
    drain_until(&mut client, "yahoo_connected").await;
}

/// A reconnect naming another league is rejected without touching the
/// upstream.
#[tokio::test]
async fn test_league_mismatch_reconnect_is_rejected() {
    let (addr, _state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!("leagueId=12345&draftPosition=1&websocketUrl={}", stub.url);
    let mut client = connect_client(&addr, &query).await;
    drain_until(&mut client, "yahoo_connected").await;

    client
        .send(WsMessage::Text(
            "{\"type\":\"yahoo_reconnect\",\"data\":{\"leagueId\":\"99999\",\"draftPosition\":2}}"
                .into(),
        ))
        .await
        .unwrap();

    let error = drain_until(&mut client, "yahoo_error").await;
    assert_eq!(error["error"], "Failed to reconnect to Yahoo");

    // No new dial, no close: the stub stays quiet.
    let extra = tokio::time::timeout(Duration::from_millis(300), stub.events.recv()).await;
    assert!(extra.is_err(), "upstream should be untouched: {extra:?}");
}

/// Handshakes without the required query parameters complete the upgrade and
/// are closed with policy code 1008.
#[tokio::test]
async fn test_handshake_rejected_without_required_params() {
    let (addr, state) = setup_proxy().await;

    let url = format!("ws://{addr}{WS_PATH}?leagueId=12345&draftPosition=1");
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for rejection")
        .expect("stream ended")
        .expect("websocket error");
    match msg {
        WsMessage::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1008);
            assert!(frame
                .reason
                .as_str()
                .starts_with("Missing required parameters"));
        }
        other => panic!("Expected close frame, got {other:?}"),
    }

    assert_eq!(state.registry.room_count(), 0);
}

/// Heartbeats: a short interval produces repeated `c` frames upstream.
#[tokio::test]
async fn test_heartbeat_frames_sent_while_open() {
    let mut settings = Settings::default();
    settings.heartbeat_interval = 200;
    let (addr, state) = setup_proxy_with(settings).await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!("leagueId=12345&draftPosition=1&websocketUrl={}", stub.url);
    let mut client = connect_client(&addr, &query).await;
    drain_until(&mut client, "yahoo_connected").await;

    for _ in 0..2 {
        stub.wait_for("heartbeat", |e| {
            matches!(e, StubEvent::Frame { text, .. } if text == "c")
        })
        .await;
    }

    let room_status = state
        .registry
        .get("12345")
        .unwrap()
        .status()
        .await
        .unwrap();
    assert!(room_status.last_heartbeat.is_some());
}

/// A room whose upstream URL changes is replaced rather than reused.
#[tokio::test]
async fn test_changed_upstream_url_replaces_room() {
    let (addr, state) = setup_proxy().await;
    let mut stub_a = spawn_upstream_stub().await;
    let mut stub_b = spawn_upstream_stub().await;

    let query_a = format!("leagueId=12345&draftPosition=1&websocketUrl={}", stub_a.url);
    let mut client_a = connect_client(&addr, &query_a).await;
    drain_until(&mut client_a, "yahoo_connected").await;
    let instance_a = state.registry.get("12345").unwrap().instance();

    let query_b = format!("leagueId=12345&draftPosition=2&websocketUrl={}", stub_b.url);
    let mut client_b = connect_client(&addr, &query_b).await;
    drain_until(&mut client_b, "yahoo_connected").await;

    let instance_b = state.registry.get("12345").unwrap().instance();
    assert_ne!(instance_a, instance_b, "room must be replaced");
    assert_eq!(state.registry.room_count(), 1);

    // Old room's sessions were force-closed, old upstream torn down.
    stub_a
        .wait_for("old upstream closed", |e| {
            matches!(e, StubEvent::Closed { .. })
        })
        .await;
    stub_b
        .wait_for("new upstream joined", |e| {
            matches!(e, StubEvent::Frame { text, .. } if text.starts_with("8|12345|2|"))
        })
        .await;
}

/// Status surface: health totals, per-room status, 404s, and force retire.
#[tokio::test]
async fn test_status_surface_and_force_retire() {
    let (addr, state) = setup_proxy().await;
    let mut stub = spawn_upstream_stub().await;

    let query = format!(
        "leagueId=12345&draftPosition=4&websocketUrl={}&platformUserId=user-a",
        stub.url
    );
    let mut client = connect_client(&addr, &query).await;
    drain_until(&mut client, "yahoo_connected").await;

    let health = status::health(State(state.clone())).await.0;
    assert_eq!(health.status, "ok");
    assert_eq!(health.active_rooms, 1);
    assert_eq!(health.total_clients, 1);
    assert_eq!(health.rooms, vec!["12345".to_string()]);

    let rooms = status::list_rooms(State(state.clone())).await.0;
    assert_eq!(rooms.total_rooms, 1);
    assert_eq!(rooms.rooms[0].league_id, "12345");
    assert_eq!(rooms.rooms[0].draft_position, 4);
    assert!(rooms.rooms[0].yahoo_connected);
    assert!(rooms.rooms[0].has_joined);

    let single = status::room_status(State(state.clone()), Path("12345".to_string()))
        .await
        .unwrap()
        .0;
    assert_eq!(single.platform_user_id, "user-a");

    let missing = status::room_status(State(state.clone()), Path("nope".to_string())).await;
    assert!(missing.is_err());

    // Force retire closes the session with 1001 and empties the registry.
    status::force_retire(State(state.clone()), Path("12345".to_string()))
        .await
        .unwrap();

    let mut saw_close = false;
    for _ in 0..50 {
        match tokio::time::timeout(Duration::from_secs(2), client.next()).await {
            Ok(Some(Ok(WsMessage::Close(Some(frame))))) => {
                assert_eq!(u16::from(frame.code), 1001);
                assert_eq!(frame.reason.as_str(), "Room force cleanup");
                saw_close = true;
                break;
            }
            Ok(Some(Ok(_))) => continue,
            _ => break,
        }
    }
    assert!(saw_close, "client should receive the force-cleanup close");
    assert_eq!(state.registry.room_count(), 0);
}
