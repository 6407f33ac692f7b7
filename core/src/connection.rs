//! Push channel connection management.
//!
//! One channel per conversation view. The manager task owns the socket,
//! re-joins the view's rooms after every connect and, when the socket drops,
//! waits a flat reconnect delay and tries again until the handle is closed.

use crate::error::{Error, Result};
use crate::protocol::{
    self, ClientEvent, Frame, ServerEvent, DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT,
};
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

// ============================================================================
// Transport
// ============================================================================

/// Raw text frames in both directions. The link is dead once `incoming`
/// yields `None`.
pub struct Link {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Link>> + Send;
}

/// WebSocket transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &str) -> impl Future<Output = Result<Link>> + Send {
        let url = url.to_string();
        async move {
            let (ws_stream, _) = connect_async(url.as_str()).await?;
            let (mut write, mut read) = ws_stream.split();

            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

            // Receive task
            tokio::spawn(async move {
                while let Some(msg) = read.next().await {
                    match msg {
                        Ok(WsMessage::Text(text)) => {
                            if in_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Ok(WsMessage::Close(_)) => break,
                        Err(e) => {
                            tracing::debug!("WebSocket read error: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }
            });

            // Send task
            tokio::spawn(async move {
                while let Some(msg) = out_rx.recv().await {
                    if write.send(WsMessage::Text(msg)).await.is_err() {
                        break;
                    }
                }
                write.send(WsMessage::Close(None)).await.ok();
            });

            Ok(Link {
                outgoing: out_tx,
                incoming: in_rx,
            })
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    ConnectError(String),
    Server(ServerEvent),
}

enum PumpEnd {
    Dropped,
    Shutdown,
}

pub struct ConnectionManager<C: Connector> {
    connector: C,
    url: String,
    joins: Vec<ClientEvent>,
    settings: ConnectionSettings,
    events: mpsc::UnboundedSender<ChannelEvent>,
    commands: mpsc::UnboundedReceiver<ClientEvent>,
    connected: watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Starts the connection task. Events for the view arrive on the
    /// returned receiver.
    pub fn spawn(
        connector: C,
        url: impl Into<String>,
        joins: Vec<ClientEvent>,
        settings: ConnectionSettings,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = Self {
            connector,
            url: url.into(),
            joins,
            settings,
            events: events_tx,
            commands: commands_rx,
            connected: connected_tx,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(manager.run());

        let handle = ConnectionHandle {
            commands: commands_tx,
            connected: connected_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        };
        (handle, events_rx)
    }

    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            tracing::debug!("Connecting to {}", self.url);
            let attempt = tokio::select! {
                result = tokio::time::timeout(
                    self.settings.connect_timeout,
                    handshake(&self.connector, &self.url),
                ) => result,
                _ = self.shutdown.changed() => break,
            };

            match attempt {
                Ok(Ok((link, liveness))) => {
                    if let PumpEnd::Shutdown = self.pump(link, liveness).await {
                        break;
                    }
                    tracing::warn!(
                        "Channel disconnected, reconnecting in {:?}",
                        self.settings.reconnect_delay
                    );
                    self.connected.send_replace(false);
                    self.events.send(ChannelEvent::Disconnected).ok();
                }
                Ok(Err(e)) => {
                    tracing::warn!("Channel connect failed: {}", e);
                    self.events.send(ChannelEvent::ConnectError(e.to_string())).ok();
                }
                Err(_) => {
                    tracing::warn!(
                        "Channel connect timed out after {:?}",
                        self.settings.connect_timeout
                    );
                    self.events
                        .send(ChannelEvent::ConnectError(Error::Timeout.to_string()))
                        .ok();
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.connected.send_replace(false);
        tracing::debug!("Connection task for {} stopped", self.url);
    }

    /// Runs one connected link. The server pings every `pingInterval`; a
    /// link silent for longer than `liveness` is treated as dropped.
    async fn pump(&mut self, mut link: Link, liveness: Duration) -> PumpEnd {
        // Emits queued while offline are stale.
        while self.commands.try_recv().is_ok() {}

        for join in &self.joins {
            if link.outgoing.send(join.encode()).is_err() {
                return PumpEnd::Dropped;
            }
        }

        self.connected.send_replace(true);
        self.events.send(ChannelEvent::Connected).ok();
        tracing::info!("Channel connected: {}", self.url);

        let mut deadline = Instant::now() + liveness;

        loop {
            tokio::select! {
                frame = link.incoming.recv() => {
                    let Some(text) = frame else {
                        return PumpEnd::Dropped;
                    };
                    deadline = Instant::now() + liveness;
                    match protocol::decode(&text) {
                        Ok(Frame::Ping(payload)) => {
                            link.outgoing.send(protocol::encode_pong(&payload)).ok();
                        }
                        Ok(Frame::Event { name, data, .. }) => {
                            match ServerEvent::parse(&name, data) {
                                Ok(event) => {
                                    self.events.send(ChannelEvent::Server(event)).ok();
                                }
                                Err(e) => {
                                    tracing::debug!("Ignoring malformed {} event: {}", name, e)
                                }
                            }
                        }
                        Ok(Frame::Disconnect) | Ok(Frame::Close) => return PumpEnd::Dropped,
                        Ok(_) => {}
                        Err(e) => tracing::debug!("Ignoring frame: {}", e),
                    }
                }
                command = self.commands.recv() => {
                    let Some(event) = command else {
                        return PumpEnd::Shutdown;
                    };
                    if link.outgoing.send(event.encode()).is_err() {
                        return PumpEnd::Dropped;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("No frame from server for {:?}", liveness);
                    return PumpEnd::Dropped;
                }
                _ = self.shutdown.changed() => {
                    link.outgoing.send("41".to_string()).ok();
                    return PumpEnd::Shutdown;
                }
            }
        }
    }
}

/// Opens the link and completes the namespace connect. Returns the link and
/// the silence allowed on it (`pingInterval + pingTimeout`).
async fn handshake<C: Connector>(connector: &C, url: &str) -> Result<(Link, Duration)> {
    let mut link = connector.connect(url).await?;
    let mut liveness = Duration::from_millis(DEFAULT_PING_INTERVAL + DEFAULT_PING_TIMEOUT);

    loop {
        let text = link
            .incoming
            .recv()
            .await
            .ok_or_else(|| Error::Connection("closed during handshake".into()))?;

        match protocol::decode(&text)? {
            Frame::Open(handshake) => {
                tracing::debug!("Engine session {} opened", handshake.sid);
                liveness =
                    Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
                link.outgoing
                    .send(protocol::CONNECT.to_string())
                    .map_err(|_| Error::Connection("closed during handshake".into()))?;
            }
            Frame::Ping(payload) => {
                link.outgoing.send(protocol::encode_pong(&payload)).ok();
            }
            Frame::Connect { .. } => return Ok((link, liveness)),
            Frame::ConnectError(message) => return Err(Error::Connection(message)),
            Frame::Close => return Err(Error::Connection("closed during handshake".into())),
            _ => {}
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owned by the conversation view. Dropping it closes the channel.
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<ClientEvent>,
    connected: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Fire-and-forget emit. Fails while disconnected.
    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Offline);
        }
        self.commands.send(event).map_err(|_| Error::Offline)
    }

    /// Closes the channel and cancels any pending reconnect.
    pub async fn close(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::debug!("Connection task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

// ============================================================================
// Test transport
// ============================================================================
