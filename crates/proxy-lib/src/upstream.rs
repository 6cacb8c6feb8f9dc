//! Upstream Link: the proxy's outbound WebSocket to the draft server.
//!
//! A link is a state-tracking handle owned by a single room plus a spawned
//! I/O task that performs the dial, the read loop, and all writes. The task
//! reports back through an event channel; every event carries the link's
//! instance id so the owner can discard events from a superseded link. A new
//! link is instantiated for every connect attempt, so state transitions are
//! monotonic within one instance.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::client::Request,
        http::{header, HeaderValue},
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};
use tracing::debug;

use crate::error::AppError;

/// Synthetic close code for dials that never produced a connection.
pub const CLOSE_CODE_DIAL_FAILED: u16 = 0;
/// Close code for I/O failures on an established link.
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;
/// Close code when the peer closed without sending a close frame.
pub const CLOSE_CODE_NO_STATUS: u16 = 1005;

const DIAL_FAILED_REASON: &str = "dial failed";

/// Lifecycle of a single link instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Events delivered to the owning room, tagged with the link instance id.
/// `Closed` is terminal and emitted exactly once per instance.
#[derive(Debug)]
pub enum UpstreamEvent {
    Open { link: u64 },
    Frame { link: u64, text: String },
    Error { link: u64, error: AppError },
    Closed { link: u64, code: u16, reason: String },
}

enum LinkCommand {
    Send(String),
    Close { code: u16, reason: String },
}

/// Handle to one upstream connection attempt.
pub struct UpstreamLink {
    id: u64,
    url: String,
    user_agent: String,
    dial_timeout: Duration,
    state: LinkState,
    intentional: bool,
    cmd_tx: mpsc::UnboundedSender<LinkCommand>,
    cmd_rx: Option<mpsc::UnboundedReceiver<LinkCommand>>,
    events: mpsc::UnboundedSender<UpstreamEvent>,
}

impl UpstreamLink {
    pub fn new(
        id: u64,
        url: String,
        user_agent: String,
        dial_timeout: Duration,
        events: mpsc::UnboundedSender<UpstreamEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            id,
            url,
            user_agent,
            dial_timeout,
            state: LinkState::Idle,
            intentional: false,
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            events,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn is_intentional(&self) -> bool {
        self.intentional
    }

    /// Record that the dial completed. Called by the owner when it processes
    /// the `Open` event, keeping the handle's view serialized with the room.
    pub fn mark_open(&mut self) {
        self.state = LinkState::Open;
    }

    /// Record that the link is finished. Called on the `Closed` event.
    pub fn mark_closed(&mut self) {
        self.state = LinkState::Closed;
    }

    /// Start the dial. Idempotent: a link that is already connecting or open
    /// is left alone, and a finished link is never revived.
    pub fn connect(&mut self) {
        if self.state != LinkState::Idle {
            return;
        }
        let Some(cmd_rx) = self.cmd_rx.take() else {
            return;
        };
        self.state = LinkState::Connecting;
        debug!(link = self.id, url = %self.url, "dialing upstream");
        tokio::spawn(run_link(
            self.id,
            self.url.clone(),
            self.user_agent.clone(),
            self.dial_timeout,
            cmd_rx,
            self.events.clone(),
        ));
    }

    /// Enqueue a text frame for transmission, in submission order.
    pub fn send(&self, text: String) -> Result<(), AppError> {
        if self.state != LinkState::Open {
            return Err(AppError::NotOpen);
        }
        self.cmd_tx.send(LinkCommand::Send(text))?;
        Ok(())
    }

    /// Request a close handshake with the given code and reason.
    pub fn close(&mut self, code: u16, reason: &str, intentional: bool) {
        if intentional {
            self.intentional = true;
        }
        if matches!(self.state, LinkState::Closing | LinkState::Closed) {
            return;
        }
        self.state = LinkState::Closing;
        let _ = self.cmd_tx.send(LinkCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Build the client handshake request. tungstenite's client handshake sends
/// no `Origin` header unless one is explicitly set, which is exactly the
/// behavior the upstream requires.
fn build_request(url: &str, user_agent: &str) -> Result<Request, String> {
    let mut request = url.into_client_request().map_err(|e| e.to_string())?;
    let headers = request.headers_mut();
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_str(user_agent).map_err(|e| e.to_string())?,
    );
    headers.insert(
        header::ACCEPT_ENCODING,
        HeaderValue::from_static("gzip, deflate, br"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    Ok(request)
}

/// Wait for a close request (or the handle being dropped) while the dial is
/// still in flight. Sends before open are impossible and discarded.
async fn wait_for_close(rx: &mut mpsc::UnboundedReceiver<LinkCommand>) -> Option<(u16, String)> {
    loop {
        match rx.recv().await {
            Some(LinkCommand::Close { code, reason }) => return Some((code, reason)),
            Some(LinkCommand::Send(_)) => continue,
            None => return None,
        }
    }
}

async fn run_link(
    id: u64,
    url: String,
    user_agent: String,
    dial_timeout: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<UpstreamEvent>,
) {
    let request = match build_request(&url, &user_agent) {
        Ok(request) => request,
        Err(e) => {
            let _ = events.send(UpstreamEvent::Error {
                link: id,
                error: AppError::UpstreamDial(e),
            });
            let _ = events.send(UpstreamEvent::Closed {
                link: id,
                code: CLOSE_CODE_DIAL_FAILED,
                reason: DIAL_FAILED_REASON.to_string(),
            });
            return;
        }
    };

    let ws = tokio::select! {
        res = tokio::time::timeout(dial_timeout, connect_async(request)) => {
            match res {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => {
                    let _ = events.send(UpstreamEvent::Error {
                        link: id,
                        error: AppError::UpstreamDial(e.to_string()),
                    });
                    let _ = events.send(UpstreamEvent::Closed {
                        link: id,
                        code: CLOSE_CODE_DIAL_FAILED,
                        reason: DIAL_FAILED_REASON.to_string(),
                    });
                    return;
                }
                Err(_) => {
                    let _ = events.send(UpstreamEvent::Error {
                        link: id,
                        error: AppError::UpstreamDial(format!(
                            "timed out after {}ms",
                            dial_timeout.as_millis()
                        )),
                    });
                    let _ = events.send(UpstreamEvent::Closed {
                        link: id,
                        code: CLOSE_CODE_DIAL_FAILED,
                        reason: DIAL_FAILED_REASON.to_string(),
                    });
                    return;
                }
            }
        }
        cmd = wait_for_close(&mut cmd_rx) => {
            if let Some((code, reason)) = cmd {
                let _ = events.send(UpstreamEvent::Closed { link: id, code, reason });
            }
            return;
        }
    };

    let _ = events.send(UpstreamEvent::Open { link: id });
    let (mut sink, mut stream) = ws.split();

    let (close_code, close_reason) = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(LinkCommand::Send(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        let _ = events.send(UpstreamEvent::Error {
                            link: id,
                            error: AppError::UpstreamRuntime(e.to_string()),
                        });
                        break (CLOSE_CODE_ABNORMAL, "write failed".to_string());
                    }
                }
                Some(LinkCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break (code, reason);
                }
                None => {
                    // Owner dropped the handle without an explicit close.
                    let _ = sink.send(Message::Close(None)).await;
                    break (1000, String::new());
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(UpstreamEvent::Frame {
                        link: id,
                        text: text.to_string(),
                    });
                }
                Some(Ok(Message::Close(frame))) => match frame {
                    Some(f) => break (u16::from(f.code), f.reason.to_string()),
                    None => break (CLOSE_CODE_NO_STATUS, String::new()),
                },
                Some(Ok(_)) => {} // ping/pong/binary carry nothing to relay
                Some(Err(e)) => {
                    let _ = events.send(UpstreamEvent::Error {
                        link: id,
                        error: AppError::UpstreamRuntime(e.to_string()),
                    });
                    break (CLOSE_CODE_ABNORMAL, "read failed".to_string());
                }
                None => break (CLOSE_CODE_NO_STATUS, String::new()),
            }
        }
    };

    let _ = events.send(UpstreamEvent::Closed {
        link: id,
        code: close_code,
        reason: close_reason,
    });
}
