//! Connection lifecycle: the state machine driving connect, authenticate,
//! heartbeat, and reconnect.
//!
//! A background tokio task exclusively owns the transport and every state
//! transition; the public [`WsClient`] talks to it over an mpsc command
//! channel and observes it through watch/broadcast channels. Outbound sends
//! issued while a reconnect is in flight suspend on the reconnect-completed
//! signal, which fires only after every tracked subscription has been
//! replayed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::{self, Credentials};
use crate::error::WsError;
use crate::liveness::Liveness;
use crate::message::{MessageIn, MessageOut, PONG_FRAME};
use crate::network::DEFAULT_WS_URL;
use crate::router::Router;
use crate::subscriptions::{topic_key, SubscriptionAck, SubscriptionRegistry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for the WS client.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    /// Presence of credentials triggers a login frame on every (re)connect.
    pub credentials: Option<Credentials>,
    /// Fixed delay between reconnect attempts. No exponential growth.
    pub reconnect_delay_ms: u64,
    /// Application-level ping period.
    pub ping_interval_ms: u64,
    /// Ping→pong round-trip above this is treated as a dead connection.
    pub stale_after_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            credentials: None,
            reconnect_delay_ms: 500,
            ping_interval_ms: 5_000,
            stale_after_ms: 2_000,
        }
    }
}

/// Current connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Closed,
    Connecting,
    Open,
    Reconnecting,
}

/// Connection-status events delivered to [`WsClient::status`] subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting,
}

// ─── Commands from public API to background task ─────────────────────────────

enum Command {
    Send(Value),
    Terminate,
}

// ─── Disconnect reasons for the reconnection decision ────────────────────────

enum DisconnectReason {
    Terminated,
    Stale,
    Closed { code: Option<u16>, reason: String },
    TransportError(String),
}

// ─── Shared state between public API and background task ────────────────────

struct Shared {
    state: watch::Sender<ReadyState>,
    /// Generation counter bumped after each reconnect cycle's replay.
    reconnected: watch::Sender<u64>,
    status: broadcast::Sender<StatusEvent>,
    authenticated: AtomicBool,
    registry: Mutex<SubscriptionRegistry>,
    router: Mutex<Router>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: watch::Sender::new(ReadyState::Closed),
            reconnected: watch::Sender::new(0),
            status: broadcast::Sender::new(64),
            authenticated: AtomicBool::new(false),
            registry: Mutex::new(SubscriptionRegistry::default()),
            router: Mutex::new(Router::default()),
        }
    }

    fn state(&self) -> ReadyState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ReadyState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: StatusEvent) {
        let _ = self.status.send(event);
    }

    /// Classify one inbound text frame and act on it. Pong is matched as a
    /// literal and consumed before any JSON parsing.
    fn handle_frame(&self, text: &str, liveness: &mut Liveness) {
        if text == PONG_FRAME {
            liveness.record_pong();
            return;
        }
        match serde_json::from_str::<MessageIn>(text) {
            Ok(MessageIn::Pong) => liveness.record_pong(),
            Ok(MessageIn::Subscribed { market, channel }) => {
                let topic = topic_key(&channel, market.as_deref());
                let matched = self
                    .registry
                    .lock()
                    .expect("lock poisoned")
                    .acknowledge(&channel, market.as_deref());
                if matched {
                    tracing::debug!(%topic, "subscription acknowledged");
                } else {
                    tracing::warn!(%topic, "ack for unknown subscription");
                }
            }
            Ok(MessageIn::Update {
                market,
                channel,
                data,
            })
            | Ok(MessageIn::Partial {
                market,
                channel,
                data,
            }) => {
                let topic = topic_key(&channel, market.as_deref());
                let delivered = self
                    .router
                    .lock()
                    .expect("lock poisoned")
                    .dispatch(&topic, &data);
                if delivered == 0 {
                    tracing::debug!(%topic, "update with no listeners");
                }
            }
            Ok(MessageIn::Unknown) => tracing::debug!(frame = %text, "unhandled message type"),
            Err(e) => tracing::warn!(error = %e, "dropping malformed frame"),
        }
    }
}

// ─── Public WsClient ─────────────────────────────────────────────────────────

/// Resilient client for the venue's duplex message stream.
///
/// Owns at most one live transport at a time. Reconnects with a fixed
/// backoff after any transport loss, re-sends the login frame, and replays
/// all tracked subscriptions in registration order before releasing sends
/// queued during the outage.
pub struct WsClient {
    config: WsConfig,
    shared: Arc<Shared>,
    cmd_tx: Option<mpsc::Sender<Command>>,
    task_handle: Option<JoinHandle<()>>,
}

impl WsClient {
    /// Create a new client. Does not connect yet.
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new()),
            cmd_tx: None,
            task_handle: None,
        }
    }

    /// Open the connection and wait until the transport reports open.
    ///
    /// No-op if the connection task is already running. After the first
    /// open, the task keeps the connection alive on its own, reconnecting
    /// indefinitely until [`terminate`](Self::terminate).
    pub async fn connect(&mut self) -> Result<(), WsError> {
        if self.cmd_tx.is_some() {
            return Ok(());
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        self.cmd_tx = Some(cmd_tx);
        self.shared.set_state(ReadyState::Connecting);

        let task = ConnectionTask {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            cmd_rx,
        };
        self.task_handle = Some(tokio::spawn(task.run()));

        self.wait_ready().await
    }

    /// Forcibly close the transport and stop reconnecting. Tracked
    /// subscriptions are kept; a later [`connect`](Self::connect) replays
    /// them.
    pub async fn terminate(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(Command::Terminate).await;
        }
        if let Some(handle) = self.task_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        self.shared.authenticated.store(false, Ordering::SeqCst);
        self.shared.set_state(ReadyState::Closed);
    }

    /// Send an arbitrary payload to the venue.
    ///
    /// Fails with [`WsError::NotConnected`] unless connected or
    /// reconnecting; while reconnecting, suspends until the reconnect cycle
    /// completes, then transmits. This is the sole outbound path: ping,
    /// login, and subscribe frames all go through the same wire.
    pub async fn send_message<T: Serialize>(&self, payload: &T) -> Result<(), WsError> {
        let value = serde_json::to_value(payload)?;
        self.send_value(value).await
    }

    /// Subscribe to a channel, optionally scoped to a market.
    ///
    /// Returns `Ok(None)` if the `(market, channel)` pair is already
    /// tracked (logged, no wire traffic). Otherwise registers the pair,
    /// sends the subscribe op, and returns the ack handle resolved when the
    /// venue confirms.
    pub async fn subscribe(
        &self,
        channel: &str,
        market: Option<&str>,
    ) -> Result<Option<SubscriptionAck>, WsError> {
        if self.cmd_tx.is_none()
            || !matches!(
                self.shared.state(),
                ReadyState::Open | ReadyState::Reconnecting
            )
        {
            return Err(WsError::NotConnected);
        }

        let ack = self
            .shared
            .registry
            .lock()
            .expect("lock poisoned")
            .register(channel, market);
        let Some(ack) = ack else {
            tracing::warn!(topic = %topic_key(channel, market), "duplicate subscription ignored");
            return Ok(None);
        };

        let msg = serde_json::to_value(MessageOut::subscribe(channel, market))?;
        self.send_value(msg).await?;
        Ok(Some(ack))
    }

    /// Register a listener for a `(market, channel)` topic. Every `update`
    /// and `partial` frame on that topic delivers its `data` payload to the
    /// returned receiver.
    pub fn listen(&self, channel: &str, market: Option<&str>) -> mpsc::UnboundedReceiver<Value> {
        self.shared
            .router
            .lock()
            .expect("lock poisoned")
            .listen(&topic_key(channel, market))
    }

    /// Subscribe to connection-status events.
    pub fn status(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.status.subscribe()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Whether a login frame has been sent on the current connection. The
    /// venue never acknowledges logins, so this is optimistic.
    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::SeqCst)
    }

    /// Number of tracked subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.registry.lock().expect("lock poisoned").len()
    }

    /// Readiness: wait until the transport is open and usable. Re-armed on
    /// every reconnect cycle.
    async fn wait_ready(&self) -> Result<(), WsError> {
        let mut rx = self.shared.state.subscribe();
        loop {
            match *rx.borrow_and_update() {
                ReadyState::Open => return Ok(()),
                ReadyState::Closed => return Err(WsError::NotConnected),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(WsError::NotConnected);
            }
        }
    }

    async fn send_value(&self, value: Value) -> Result<(), WsError> {
        let cmd_tx = self
            .cmd_tx
            .as_ref()
            .ok_or(WsError::NotConnected)?
            .clone();
        self.wait_send_gate().await?;
        cmd_tx
            .send(Command::Send(value))
            .await
            .map_err(|_| WsError::NotConnected)
    }

    /// Gate outbound sends: pass through when connected, suspend while
    /// reconnecting until the reconnect-completed signal fires, fail
    /// otherwise.
    async fn wait_send_gate(&self) -> Result<(), WsError> {
        loop {
            // Subscribe before reading the state so a completion between the
            // two is never missed.
            let mut rx = self.shared.reconnected.subscribe();
            match self.shared.state() {
                ReadyState::Open => return Ok(()),
                ReadyState::Reconnecting => {
                    if rx.changed().await.is_err() {
                        return Err(WsError::NotConnected);
                    }
                }
                _ => return Err(WsError::NotConnected),
            }
        }
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

// ─── Background task ─────────────────────────────────────────────────────────

struct ConnectionTask {
    config: WsConfig,
    shared: Arc<Shared>,
    cmd_rx: mpsc::Receiver<Command>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let delay = Duration::from_millis(self.config.reconnect_delay_ms);
        let mut first_attempt = true;
        // Sends that raced into the command channel as the transport died;
        // flushed after the post-reconnect replay.
        let mut pending: Vec<Value> = Vec::new();

        loop {
            if !first_attempt {
                self.shared.set_state(ReadyState::Reconnecting);
                self.shared.emit(StatusEvent::Reconnecting);
                // Fixed backoff; only terminate can cut the wait short.
                let deadline = tokio::time::Instant::now() + delay;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => break,
                        cmd = self.cmd_rx.recv() => match cmd {
                            Some(Command::Terminate) | None => {
                                self.shared.set_state(ReadyState::Closed);
                                return;
                            }
                            Some(Command::Send(value)) => pending.push(value),
                        }
                    }
                }
            }
            first_attempt = false;

            let ws = match attempt_connect(&self.config.url).await {
                Ok(ws) => ws,
                Err(e) => {
                    tracing::error!(error = %e, url = %self.config.url, "connection attempt failed");
                    continue;
                }
            };

            let (mut sink, mut stream) = ws.split();
            self.shared.set_state(ReadyState::Open);
            self.shared.emit(StatusEvent::Connected);
            tracing::info!(url = %self.config.url, "connected");

            // Fire-and-forget login: the venue sends no acknowledgment.
            if let Some(creds) = &self.config.credentials {
                let login = auth::login_message(creds, Utc::now().timestamp_millis());
                match send_msg(&mut sink, &login).await {
                    Ok(()) => {
                        self.shared.authenticated.store(true, Ordering::SeqCst);
                        tracing::info!("login sent");
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to send login"),
                }
            }

            // Replay tracked subscriptions in registration order, before
            // unblocking senders queued behind the reconnect gate.
            let replay = self
                .shared
                .registry
                .lock()
                .expect("lock poisoned")
                .replay_messages();
            if !replay.is_empty() {
                tracing::info!(count = replay.len(), "replaying subscriptions");
            }
            for msg in &replay {
                if let Err(e) = send_msg(&mut sink, msg).await {
                    tracing::warn!(error = %e, "failed to replay subscription");
                }
            }
            for value in pending.drain(..) {
                if let Err(e) = send_text(&mut sink, value.to_string()).await {
                    tracing::warn!(error = %e, "failed to flush pending send");
                }
            }
            self.shared.reconnected.send_modify(|generation| *generation += 1);

            let reason = self.run_connected(&mut sink, &mut stream).await;
            self.shared.authenticated.store(false, Ordering::SeqCst);

            match reason {
                DisconnectReason::Terminated => {
                    self.shared.set_state(ReadyState::Closed);
                    self.shared.emit(StatusEvent::Disconnected {
                        reason: "terminated".into(),
                    });
                    return;
                }
                DisconnectReason::Stale => {
                    tracing::warn!("stale connection, forcing reconnect");
                    self.shared.emit(StatusEvent::Disconnected {
                        reason: "stale connection".into(),
                    });
                }
                DisconnectReason::Closed { code, reason } => {
                    tracing::warn!(?code, %reason, "connection closed by peer");
                    self.shared.emit(StatusEvent::Disconnected { reason });
                }
                DisconnectReason::TransportError(reason) => {
                    tracing::error!(error = %reason, "transport error");
                    self.shared.emit(StatusEvent::Disconnected { reason });
                }
            }
        }
    }

    /// The connected loop. Runs until the connection breaks or terminates.
    async fn run_connected(
        &mut self,
        sink: &mut SplitSink<WsStream, Message>,
        stream: &mut SplitStream<WsStream>,
    ) -> DisconnectReason {
        let ping_period = Duration::from_millis(self.config.ping_interval_ms);
        let mut liveness = Liveness::new(
            ping_period,
            Duration::from_millis(self.config.stale_after_ms),
        );
        let mut ping_interval = tokio::time::interval(ping_period);
        ping_interval.reset(); // skip the immediate first tick

        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.shared.handle_frame(text.as_ref(), &mut liveness);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = extract_close(frame.as_ref());
                        return DisconnectReason::Closed { code: Some(code), reason };
                    }
                    Some(Ok(_)) => {} // binary frames are not part of the protocol
                    Some(Err(e)) => {
                        return DisconnectReason::TransportError(e.to_string());
                    }
                    None => {
                        return DisconnectReason::TransportError("stream ended".into());
                    }
                },

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Send(value)) => {
                        if let Err(e) = send_text(sink, value.to_string()).await {
                            tracing::warn!(error = %e, "send failed");
                        }
                    }
                    Some(Command::Terminate) | None => {
                        let _ = sink.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client terminate".into(),
                        }))).await;
                        return DisconnectReason::Terminated;
                    }
                },

                _ = ping_interval.tick() => {
                    if liveness.tick() {
                        let _ = sink.close().await;
                        return DisconnectReason::Stale;
                    }
                    if let Err(e) = send_msg(sink, &MessageOut::Ping).await {
                        tracing::warn!(error = %e, "failed to send ping");
                    }
                }
            }
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn attempt_connect(url: &str) -> Result<WsStream, WsError> {
    let (ws, _) = tokio::time::timeout(Duration::from_secs(30), connect_async(url))
        .await
        .map_err(|_| WsError::ConnectionFailed("connection timeout".into()))?
        .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;
    Ok(ws)
}

async fn send_msg(
    sink: &mut SplitSink<WsStream, Message>,
    msg: &MessageOut,
) -> Result<(), WsError> {
    let json = serde_json::to_string(msg)?;
    send_text(sink, json).await
}

async fn send_text(sink: &mut SplitSink<WsStream, Message>, text: String) -> Result<(), WsError> {
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| WsError::SendFailed(e.to_string()))
}

fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "no close frame".into()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
