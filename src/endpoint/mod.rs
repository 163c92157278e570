//! The `endpoint` module is the seam between the subscriber core and whatever
//! message broker sits behind it.
//!
//! The core only needs a handful of operations: connect, open a session,
//! resolve a topic, create a consumer and attach a callback. Those are the
//! traits below. Two implementations ship with the crate:
//!
//! - `memory`: an in-process topic broker, used by tests and for local runs.
//! - `websocket`: a client for a popsub-style WebSocket broker.
//!
//! Callbacks are invoked on threads owned by the endpoint, never on the thread
//! that registered them.

use std::fmt;
use std::sync::Arc;

pub mod memory;
pub mod message;
pub mod protocol;
pub mod websocket;

pub use memory::MemoryBroker;
pub use message::{InboundMessage, MessageBody};
pub use websocket::WsEndpoint;

use crate::utils::error::EndpointError;

/// Callback invoked once per delivered message.
pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Callback invoked when the connection hits a fatal transport fault.
pub type ExceptionObserver = Arc<dyn Fn(EndpointError) + Send + Sync>;

/// What the subscriber presents to the broker when connecting.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub address: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("address", &self.address)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait MessagingEndpoint {
    type Connection: Connection;

    fn connect(&self, credentials: &Credentials) -> Result<Self::Connection, EndpointError>;
}

pub trait Connection {
    type Session: Session;

    fn start(&mut self) -> Result<(), EndpointError>;

    fn set_exception_observer(&mut self, observer: ExceptionObserver);

    fn create_session(&mut self) -> Result<Self::Session, EndpointError>;

    /// Must be safe to call more than once.
    fn close(&mut self) -> Result<(), EndpointError>;
}

pub trait Session {
    type Destination;
    type Consumer: Consumer;

    fn resolve_topic(&mut self, name: &str) -> Result<Self::Destination, EndpointError>;

    fn create_consumer(
        &mut self,
        destination: &Self::Destination,
    ) -> Result<Self::Consumer, EndpointError>;
}

pub trait Consumer {
    fn on_message(&mut self, callback: MessageCallback) -> Result<(), EndpointError>;
}
