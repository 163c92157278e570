//! WebSocket endpoint
//!
//! Connects to a popsub-style broker and drives the login -> auth ->
//! subscribe conversation from the client side. Responsibilities:
//! - Perform the handshake synchronously inside `connect`, bounded by a
//!   connect timeout, so setup failures surface as `EndpointError`s
//! - Send `subscribe` only once a consumer has a callback attached
//! - On `start`, split the socket into a writer task fed by a channel and a
//!   reader task that routes deliveries to consumer callbacks
//! - Ack QoS 1 deliveries once they have been handed to a callback
//! - Report unexpected disconnects and socket errors to the exception observer
//!
//! The blocking trait methods use `Handle::block_on`, so they must be called
//! from a thread that is not itself running inside the runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use super::protocol::{BrokerFrame, ClientMessage, ServerMessage};
use super::{
    Connection, Consumer, Credentials, ExceptionObserver, MessageCallback, MessagingEndpoint,
    Session,
};
use crate::utils::error::EndpointError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for the close frame to be flushed.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on connecting plus the login/auth exchange.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct WsEndpoint {
    handle: Handle,
    connect_timeout: Duration,
}

impl WsEndpoint {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl MessagingEndpoint for WsEndpoint {
    type Connection = WsConnection;

    fn connect(&self, credentials: &Credentials) -> Result<WsConnection, EndpointError> {
        let stream = self
            .handle
            .block_on(async {
                tokio::time::timeout(self.connect_timeout, handshake(credentials)).await
            })
            .map_err(|_| EndpointError::Connect {
                address: credentials.address.clone(),
                reason: format!(
                    "no handshake reply within {} ms",
                    self.connect_timeout.as_millis()
                ),
            })??;
        info!(
            address = %credentials.address,
            client_id = %credentials.client_id,
            "authenticated with broker"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(WsConnection {
            shared: Arc::new(Shared {
                outbound: tx,
                listeners: Mutex::new(HashMap::new()),
                observer: Mutex::new(None),
                closing: AtomicBool::new(false),
                handle: self.handle.clone(),
            }),
            pending: Some((stream, rx)),
            writer: None,
            reader: None,
        })
    }
}

async fn handshake(credentials: &Credentials) -> Result<WsStream, EndpointError> {
    let (mut stream, _response) =
        connect_async(credentials.address.as_str())
            .await
            .map_err(|e| EndpointError::Connect {
                address: credentials.address.clone(),
                reason: e.to_string(),
            })?;

    let login = ClientMessage::Login {
        username: credentials.username.clone(),
        password: credentials.password.clone(),
        client_id: Some(credentials.client_id.clone()),
    };
    send_frame(&mut stream, &login).await?;
    let token = match next_reply(&mut stream).await? {
        ServerMessage::LoginResponse { token } => token,
        ServerMessage::Error { message } => return Err(EndpointError::Auth(message)),
        other => return Err(EndpointError::Auth(format!("unexpected reply {other:?}"))),
    };

    send_frame(&mut stream, &ClientMessage::Auth { token }).await?;
    match next_reply(&mut stream).await? {
        ServerMessage::Authenticated {} => Ok(stream),
        ServerMessage::Error { message } => Err(EndpointError::Auth(message)),
        other => Err(EndpointError::Auth(format!("unexpected reply {other:?}"))),
    }
}

async fn send_frame(stream: &mut WsStream, frame: &ClientMessage) -> Result<(), EndpointError> {
    let text = encode(frame)?;
    stream
        .send(WsMessage::text(text))
        .await
        .map_err(|e| EndpointError::Transport(e.to_string()))
}

async fn next_reply(stream: &mut WsStream) -> Result<ServerMessage, EndpointError> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| EndpointError::Auth(format!("malformed reply: {e}")));
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(EndpointError::Transport(e.to_string())),
        }
    }
    Err(EndpointError::Transport(
        "connection closed during handshake".to_string(),
    ))
}

fn encode(frame: &ClientMessage) -> Result<String, EndpointError> {
    serde_json::to_string(frame).map_err(|e| EndpointError::Transport(e.to_string()))
}

/// State shared between the connection, its sessions and consumers, and the
/// reader task.
struct Shared {
    outbound: mpsc::UnboundedSender<WsMessage>,
    /// topic -> callback; `None` until the consumer attaches one
    listeners: Mutex<HashMap<String, Option<MessageCallback>>>,
    observer: Mutex<Option<ExceptionObserver>>,
    closing: AtomicBool,
    handle: Handle,
}

impl Shared {
    fn listeners(&self) -> MutexGuard<'_, HashMap<String, Option<MessageCallback>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, frame: &ClientMessage) -> Result<(), EndpointError> {
        let text = encode(frame)?;
        self.outbound
            .send(WsMessage::text(text))
            .map_err(|_| EndpointError::Closed)
    }

    fn dispatch(&self, text: &str) {
        let frame = match serde_json::from_str::<BrokerFrame>(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    "invalid broker frame: {err} | {}",
                    text.chars().take(100).collect::<String>()
                );
                return;
            }
        };
        if let BrokerFrame::Tagged(ServerMessage::Error { message }) = &frame {
            warn!(%message, "broker reported an error");
            return;
        }
        let Some(delivery) = frame.into_delivery() else {
            debug!("ignoring non-delivery frame");
            return;
        };

        // Held until the ack is queued so `close` cannot slip its close frame
        // in between.
        let listeners = self.listeners();
        let Some(callback) = listeners.get(&delivery.topic).cloned().flatten() else {
            debug!(topic = %delivery.topic, "no listener for delivery, not acking");
            return;
        };

        let message_id = delivery.message.message_id.clone();
        let message = delivery.message;
        self.handle.spawn_blocking(move || callback(message));

        if delivery.needs_ack {
            let ack = ClientMessage::Ack {
                message_id: message_id.clone(),
            };
            if let Err(err) = self.send(&ack) {
                warn!(%message_id, "failed to ack: {err}");
            }
        }
        drop(listeners);
    }

    fn fault(&self, error: EndpointError) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match observer {
            Some(observer) => observer(error),
            None => warn!("transport fault with no observer: {error}"),
        }
    }
}

pub struct WsConnection {
    shared: Arc<Shared>,
    pending: Option<(WsStream, mpsc::UnboundedReceiver<WsMessage>)>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl Connection for WsConnection {
    type Session = WsSession;

    fn start(&mut self) -> Result<(), EndpointError> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(EndpointError::Closed);
        }
        let Some((stream, mut rx)) = self.pending.take() else {
            return Ok(());
        };
        let (mut sink, mut source) = stream.split();

        self.writer = Some(self.shared.handle.spawn(async move {
            while let Some(msg) = rx.recv().await {
                let is_close = msg.is_close();
                if let Err(e) = sink.send(msg).await {
                    warn!("failed to send frame to broker: {e}");
                    break;
                }
                if is_close {
                    break;
                }
            }
        }));

        let shared = self.shared.clone();
        self.reader = Some(self.shared.handle.spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => shared.dispatch(text.as_str()),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        shared.fault(EndpointError::Transport(e.to_string()));
                        return;
                    }
                }
            }
            shared.fault(EndpointError::Transport(
                "connection closed by broker".to_string(),
            ));
        }));
        Ok(())
    }

    fn set_exception_observer(&mut self, observer: ExceptionObserver) {
        *self
            .shared
            .observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    fn create_session(&mut self) -> Result<WsSession, EndpointError> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(EndpointError::Closed);
        }
        Ok(WsSession {
            shared: self.shared.clone(),
        })
    }

    fn close(&mut self) -> Result<(), EndpointError> {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Never started: dropping the socket is enough.
        self.pending = None;

        if let Some(mut writer) = self.writer.take() {
            {
                let _listeners = self.shared.listeners();
                let _ = self.shared.outbound.send(WsMessage::Close(None));
            }
            if Handle::try_current().is_err() {
                self.shared.handle.block_on(async {
                    let _ = tokio::time::timeout(CLOSE_GRACE, &mut writer).await;
                });
            }
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        debug!("broker connection closed");
        Ok(())
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub struct WsSession {
    shared: Arc<Shared>,
}

/// A resolved topic name.
#[derive(Debug, Clone)]
pub struct WsTopic {
    name: String,
}

impl WsTopic {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Session for WsSession {
    type Destination = WsTopic;
    type Consumer = WsConsumer;

    fn resolve_topic(&mut self, name: &str) -> Result<WsTopic, EndpointError> {
        if name.is_empty() {
            return Err(EndpointError::Subscribe("empty topic name".to_string()));
        }
        Ok(WsTopic {
            name: name.to_string(),
        })
    }

    fn create_consumer(&mut self, destination: &WsTopic) -> Result<WsConsumer, EndpointError> {
        if self.shared.listeners().contains_key(&destination.name) {
            return Err(EndpointError::Subscribe(format!(
                "already subscribed to {}",
                destination.name
            )));
        }
        self.shared
            .listeners()
            .insert(destination.name.clone(), None);
        Ok(WsConsumer {
            topic: destination.name.clone(),
            shared: self.shared.clone(),
            subscribed: false,
        })
    }
}

/// Subscribes on the broker when the first callback is attached, so no
/// delivery can arrive before there is somewhere to hand it.
pub struct WsConsumer {
    topic: String,
    shared: Arc<Shared>,
    subscribed: bool,
}

impl Consumer for WsConsumer {
    fn on_message(&mut self, callback: MessageCallback) -> Result<(), EndpointError> {
        let mut listeners = self.shared.listeners();
        let slot = listeners
            .get_mut(&self.topic)
            .ok_or_else(|| EndpointError::Subscribe(format!("{} not registered", self.topic)))?;
        *slot = Some(callback);
        drop(listeners);

        if !self.subscribed {
            self.shared.send(&ClientMessage::Subscribe {
                topic: self.topic.clone(),
            })?;
            self.subscribed = true;
        }
        Ok(())
    }
}

impl Drop for WsConsumer {
    fn drop(&mut self) {
        self.shared.listeners().remove(&self.topic);
        if self.subscribed && !self.shared.closing.load(Ordering::SeqCst) {
            let _ = self.shared.send(&ClientMessage::Unsubscribe {
                topic: self.topic.clone(),
            });
        }
    }
}
