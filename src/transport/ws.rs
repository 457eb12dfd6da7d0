//! graphql-ws event channel.
//!
//! One background driver task owns the socket and multiplexes every logical
//! subscription over it:
//!
//! ```text
//!  Subscription ──Start/Stop──> [command mpsc] ──> Driver ──frames──> coordinator
//!  Subscription <──items mpsc── Driver <──data/error/complete── coordinator
//! ```
//!
//! Handshake: `connection_init {accessToken}` → `connection_ack` (`ka` frames
//! may arrive first). When the socket drops the driver reconnects with
//! [`Backoff`] and re-sends `start` for every live subscription. If
//! reconnecting is disabled or gives up, each live subscription receives
//! [`ChatPlugError::StreamClosed`] and ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::{BoxFuture, EventChannel, GraphQlResponse, Subscription, SubscriptionSender};
use crate::config::{ClientConfig, ReconnectConfig};
use crate::error::{ChatPlugError, Result};
use crate::protocol::{OperationRequest, WS_SUBPROTOCOL};

/// Type alias for the WebSocket stream used by the driver.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Frames sent to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ClientFrame {
    ConnectionInit { payload: Value },
    Start { id: String, payload: Value },
    Stop { id: String },
    ConnectionTerminate,
}

impl ClientFrame {
    fn start(id: &str, request: &OperationRequest) -> Self {
        Self::Start {
            id: id.to_string(),
            payload: request.body(),
        }
    }

    fn to_message(&self) -> Result<Message> {
        Ok(Message::text(serde_json::to_string(self)?))
    }
}

/// Frames received from the coordinator
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerFrame {
    ConnectionAck {},
    ConnectionError {
        #[serde(default)]
        payload: Value,
    },
    #[serde(rename = "ka")]
    KeepAlive {},
    Data {
        id: String,
        payload: GraphQlResponse,
    },
    Error {
        id: String,
        #[serde(default)]
        payload: Value,
    },
    Complete {
        id: String,
    },
}

impl ServerFrame {
    fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ChatPlugError::Protocol(format!("unreadable graphql-ws frame: {e}")))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionAck {} => "connection_ack",
            Self::ConnectionError { .. } => "connection_error",
            Self::KeepAlive {} => "ka",
            Self::Data { .. } => "data",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }
}

/// Driver settings copied out of the client configuration
#[derive(Debug, Clone)]
struct WsSettings {
    endpoint: String,
    access_token: String,
    ack_timeout: Duration,
    reconnect: ReconnectConfig,
}

enum Command {
    Start {
        id: String,
        request: OperationRequest,
        items: SubscriptionSender,
    },
    Stop {
        id: String,
    },
}

/// Event channel speaking graphql-ws over `tokio-tungstenite`
pub struct WsChannel {
    settings: Arc<WsSettings>,
    next_id: AtomicU64,
    driver: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl WsChannel {
    /// Build the channel. The socket is opened by the first subscription.
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            settings: Arc::new(WsSettings {
                endpoint: config.ws_endpoint.clone(),
                access_token: config.access_token.clone(),
                ack_timeout: config.transport.ack_timeout(),
                reconnect: config.transport.reconnect.clone(),
            }),
            next_id: AtomicU64::new(1),
            driver: Mutex::new(None),
        }
    }

    /// Command sender of the running driver, spawning one if needed
    fn driver(&self) -> Result<mpsc::UnboundedSender<Command>> {
        let mut guard = self
            .driver
            .lock()
            .map_err(|_| ChatPlugError::Protocol("event channel lock poisoned".to_string()))?;

        if let Some(tx) = guard.as_ref().filter(|tx| !tx.is_closed()) {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Driver::new(self.settings.clone(), rx).run());
        *guard = Some(tx.clone());
        Ok(tx)
    }
}

impl EventChannel for WsChannel {
    fn subscribe(&self, request: OperationRequest) -> BoxFuture<'_, Result<Subscription>> {
        Box::pin(async move {
            let driver = self.driver()?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
            let operation = request.operation;
            let (items, subscription) = Subscription::channel(id.clone(), operation);

            driver
                .send(Command::Start {
                    id: id.clone(),
                    request,
                    items,
                })
                .map_err(|_| ChatPlugError::StreamClosed("event channel driver stopped".to_string()))?;
            debug!(%id, %operation, "subscription requested");

            Ok(subscription.with_cancel(move || {
                let _ = driver.send(Command::Stop { id });
            }))
        })
    }

    fn name(&self) -> &'static str {
        "graphql-ws"
    }
}

impl std::fmt::Debug for WsChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsChannel")
            .field("endpoint", &self.settings.endpoint)
            .finish_non_exhaustive()
    }
}

/// A subscription the driver keeps alive across reconnects
struct Active {
    request: OperationRequest,
    items: SubscriptionSender,
}

/// Why a connected session ended
enum Exit {
    /// Every handle is gone
    Shutdown,
    /// The socket dropped
    Dropped(String),
}

struct Driver {
    settings: Arc<WsSettings>,
    commands: mpsc::UnboundedReceiver<Command>,
    active: HashMap<String, Active>,
    backoff: Backoff,
}

impl Driver {
    fn new(settings: Arc<WsSettings>, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        let backoff = Backoff::from_config(&settings.reconnect);
        Self {
            settings,
            commands,
            active: HashMap::new(),
            backoff,
        }
    }

    async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            match self.connect().await {
                Ok(socket) => {
                    failures = 0;
                    self.backoff.reset();
                    info!(
                        endpoint = %self.settings.endpoint,
                        subscriptions = self.active.len(),
                        "event channel connected"
                    );
                    match self.serve(socket).await {
                        Exit::Shutdown => {
                            debug!("event channel closed");
                            return;
                        },
                        Exit::Dropped(reason) => {
                            warn!(%reason, "event channel dropped");
                        },
                    }
                },
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %e, attempt = failures, "event channel connect failed");
                },
            }

            let settings = Arc::clone(&self.settings);
            let reconnect = &settings.reconnect;
            if !reconnect.enabled {
                self.fail_all("event channel disconnected and reconnecting is disabled");
                return;
            }
            if reconnect.max_attempts.is_some_and(|max| failures >= max) {
                self.fail_all("event channel gave up reconnecting");
                return;
            }

            let delay = self.backoff.next_delay();
            debug!(?delay, "event channel reconnect scheduled");
            if !self.wait(delay).await {
                return;
            }
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let mut request = self.settings.endpoint.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(WS_SUBPROTOCOL));

        let (mut socket, _response) = connect_async(request).await?;

        let init = ClientFrame::ConnectionInit {
            payload: json!({ "accessToken": self.settings.access_token }),
        };
        socket.send(init.to_message()?).await?;

        tokio::time::timeout(self.settings.ack_timeout, await_ack(&mut socket))
            .await
            .map_err(|_| ChatPlugError::Timeout("no connection_ack from coordinator".to_string()))??;

        Ok(socket)
    }

    async fn serve(&mut self, mut socket: WsStream) -> Exit {
        let resubscribe: Vec<ClientFrame> = self
            .active
            .iter()
            .map(|(id, active)| ClientFrame::start(id, &active.request))
            .collect();
        for frame in &resubscribe {
            if let Err(e) = send(&mut socket, frame).await {
                return Exit::Dropped(e.to_string());
            }
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        let _ = send(&mut socket, &ClientFrame::ConnectionTerminate).await;
                        let _ = socket.close(None).await;
                        return Exit::Shutdown;
                    };
                    let frame = match command {
                        Command::Start { id, request, items } => {
                            let frame = ClientFrame::start(&id, &request);
                            self.active.insert(id, Active { request, items });
                            frame
                        },
                        Command::Stop { id } => {
                            if self.active.remove(&id).is_none() {
                                continue;
                            }
                            debug!(%id, "subscription stopped");
                            ClientFrame::Stop { id }
                        },
                    };
                    if let Err(e) = send(&mut socket, &frame).await {
                        return Exit::Dropped(e.to_string());
                    }
                },
                message = socket.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(frame) = self.route(&text) {
                                if let Err(e) = send(&mut socket, &frame).await {
                                    return Exit::Dropped(e.to_string());
                                }
                            }
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let reason = frame.map_or_else(
                                || "no close frame".to_string(),
                                |f| format!("code {} {}", u16::from(f.code), f.reason),
                            );
                            return Exit::Dropped(format!("closed by coordinator: {reason}"));
                        },
                        Some(Ok(_)) => {
                            // Ping/pong handled by tungstenite; binary is not part of graphql-ws.
                        },
                        Some(Err(e)) => return Exit::Dropped(e.to_string()),
                        None => return Exit::Dropped("socket ended".to_string()),
                    }
                },
            }
        }
    }

    /// Deliver one server frame. Returns a frame to send back, if any.
    fn route(&mut self, text: &str) -> Option<ClientFrame> {
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ignoring frame from coordinator");
                return None;
            },
        };

        match frame {
            ServerFrame::Data { id, payload } => {
                let Some(active) = self.active.get(&id) else {
                    debug!(%id, "data for unknown subscription");
                    return None;
                };
                let item = payload.into_data(active.request.operation);
                if active.items.send(item).is_err() {
                    // receiver dropped without a Stop reaching us yet
                    self.active.remove(&id);
                    return Some(ClientFrame::Stop { id });
                }
                None
            },
            ServerFrame::Error { id, payload } => {
                if let Some(active) = self.active.remove(&id) {
                    let operation = active.request.operation;
                    warn!(%id, %operation, %payload, "subscription rejected by coordinator");
                    let _ = active.items.send(Err(ChatPlugError::Transport(format!(
                        "{operation} rejected: {payload}"
                    ))));
                }
                None
            },
            ServerFrame::Complete { id } => {
                if let Some(active) = self.active.remove(&id) {
                    debug!(%id, operation = %active.request.operation, "subscription completed");
                }
                None
            },
            ServerFrame::ConnectionError { payload } => {
                warn!(%payload, "connection_error from coordinator");
                None
            },
            ServerFrame::KeepAlive {} | ServerFrame::ConnectionAck {} => None,
        }
    }

    /// Sleep before reconnecting while still accepting commands.
    /// Returns false once every handle is gone.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Start { id, request, items }) => {
                        self.active.insert(id, Active { request, items });
                    },
                    Some(Command::Stop { id }) => {
                        self.active.remove(&id);
                    },
                    None => return false,
                },
            }
        }
    }

    fn fail_all(&mut self, reason: &str) {
        warn!(subscriptions = self.active.len(), %reason, "closing event streams");
        for (_, active) in self.active.drain() {
            let _ = active
                .items
                .send(Err(ChatPlugError::StreamClosed(reason.to_string())));
        }
    }
}

async fn send(socket: &mut WsStream, frame: &ClientFrame) -> Result<()> {
    socket.send(frame.to_message()?).await?;
    Ok(())
}

async fn await_ack(socket: &mut WsStream) -> Result<()> {
    while let Some(message) = socket.next().await {
        match message? {
            Message::Text(text) => match ServerFrame::parse(&text)? {
                ServerFrame::ConnectionAck {} => return Ok(()),
                ServerFrame::KeepAlive {} => {},
                ServerFrame::ConnectionError { payload } => {
                    return Err(ChatPlugError::Transport(format!(
                        "coordinator refused connection: {payload}"
                    )));
                },
                other => {
                    return Err(ChatPlugError::Protocol(format!(
                        "unexpected {} before connection_ack",
                        other.kind()
                    )));
                },
            },
            Message::Close(_) => {
                return Err(ChatPlugError::Transport(
                    "socket closed during handshake".to_string(),
                ));
            },
            _ => {},
        }
    }
    Err(ChatPlugError::Transport(
        "socket ended during handshake".to_string(),
    ))
}
