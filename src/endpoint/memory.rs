//! In-process broker endpoint.
//!
//! Topics map to the consumers attached to them; `publish` fans a message out
//! to every consumer that has a callback, running each callback on the
//! runtime's blocking pool so deliveries happen off the publishing thread and
//! may overlap.
//!
//! The broker also keeps a tally of every handle it has given out and taken
//! back (`ResourceStats`), and can be told to refuse connections or to raise a
//! transport fault on every live connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Connection, Consumer, Credentials, ExceptionObserver, InboundMessage, MessageCallback,
    MessagingEndpoint, Session,
};
use crate::utils::error::EndpointError;

type ConsumerId = String;
type ConnectionId = String;

/// Counts of handles created and released over the broker's lifetime.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceStats {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub connections_released: usize,
    pub sessions_opened: usize,
    pub sessions_released: usize,
    pub destinations_resolved: usize,
    pub destinations_released: usize,
    pub consumers_created: usize,
    pub consumers_released: usize,
}

impl ResourceStats {
    /// True when every handle handed out has been given back.
    pub fn all_released(&self) -> bool {
        self.connections_opened == self.connections_closed
            && self.connections_opened == self.connections_released
            && self.sessions_opened == self.sessions_released
            && self.destinations_resolved == self.destinations_released
            && self.consumers_created == self.consumers_released
    }
}

#[derive(Default)]
struct BrokerState {
    /// topic name -> consumers attached to it
    topics: HashMap<String, HashMap<ConsumerId, Option<MessageCallback>>>,
    observers: HashMap<ConnectionId, ExceptionObserver>,
    refuse_connections: Option<String>,
    /// Raised on every observer when the next consumer is created.
    setup_fault: Option<EndpointError>,
    connect_attempts: usize,
    stats: ResourceStats,
}

type SharedState = Arc<Mutex<BrokerState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, BrokerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct MemoryBroker {
    state: SharedState,
    handle: Handle,
}

impl MemoryBroker {
    /// Deliveries run on `handle`'s blocking pool.
    pub fn new(handle: Handle) -> Self {
        Self {
            state: Arc::default(),
            handle,
        }
    }

    /// Publishes `message` to every consumer on `topic` that has a callback.
    /// Returns the number of deliveries scheduled.
    pub fn publish(&self, topic: &str, message: InboundMessage) -> usize {
        let callbacks: Vec<MessageCallback> = {
            let state = lock(&self.state);
            match state.topics.get(topic) {
                Some(consumers) => consumers.values().flatten().cloned().collect(),
                None => {
                    debug!(topic, "publish to unknown topic dropped");
                    return 0;
                }
            }
        };

        for callback in &callbacks {
            let callback = callback.clone();
            let message = message.clone();
            self.handle.spawn_blocking(move || callback(message));
        }
        callbacks.len()
    }

    /// Raises `error` on every live connection's exception observer.
    pub fn fail_connections(&self, error: EndpointError) -> usize {
        let observers: Vec<ExceptionObserver> =
            lock(&self.state).observers.values().cloned().collect();
        for observer in &observers {
            let observer = observer.clone();
            let error = error.clone();
            self.handle.spawn_blocking(move || observer(error));
        }
        observers.len()
    }

    /// The next `create_consumer` raises `error` on every live connection's
    /// observer before it returns, i.e. while the subscriber is still setting up.
    pub fn fault_during_setup(&self, error: EndpointError) {
        lock(&self.state).setup_fault = Some(error);
    }

    /// Every subsequent `connect` fails with `reason`.
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        lock(&self.state).refuse_connections = Some(reason.into());
    }

    pub fn connect_attempts(&self) -> usize {
        lock(&self.state).connect_attempts
    }

    pub fn stats(&self) -> ResourceStats {
        lock(&self.state).stats
    }

    /// Consumers with a callback attached on `topic`.
    pub fn listener_count(&self, topic: &str) -> usize {
        lock(&self.state)
            .topics
            .get(topic)
            .map(|consumers| consumers.values().filter(|cb| cb.is_some()).count())
            .unwrap_or(0)
    }
}

impl MessagingEndpoint for MemoryBroker {
    type Connection = MemoryConnection;

    fn connect(&self, credentials: &Credentials) -> Result<MemoryConnection, EndpointError> {
        let mut state = lock(&self.state);
        state.connect_attempts += 1;
        if let Some(reason) = &state.refuse_connections {
            return Err(EndpointError::Connect {
                address: credentials.address.clone(),
                reason: reason.clone(),
            });
        }
        state.stats.connections_opened += 1;
        debug!(client_id = %credentials.client_id, "memory connection opened");

        Ok(MemoryConnection {
            id: Uuid::new_v4().to_string(),
            state: self.state.clone(),
            started: false,
            closed: false,
        })
    }
}

pub struct MemoryConnection {
    id: ConnectionId,
    state: SharedState,
    started: bool,
    closed: bool,
}

impl Connection for MemoryConnection {
    type Session = MemorySession;

    fn start(&mut self) -> Result<(), EndpointError> {
        if self.closed {
            return Err(EndpointError::Closed);
        }
        self.started = true;
        Ok(())
    }

    fn set_exception_observer(&mut self, observer: ExceptionObserver) {
        lock(&self.state).observers.insert(self.id.clone(), observer);
    }

    fn create_session(&mut self) -> Result<MemorySession, EndpointError> {
        if self.closed {
            return Err(EndpointError::Closed);
        }
        if !self.started {
            return Err(EndpointError::Session("connection not started".to_string()));
        }
        lock(&self.state).stats.sessions_opened += 1;
        Ok(MemorySession {
            state: self.state.clone(),
        })
    }

    fn close(&mut self) -> Result<(), EndpointError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let mut state = lock(&self.state);
        state.observers.remove(&self.id);
        state.stats.connections_closed += 1;
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if !self.closed {
            warn!("memory connection dropped without close");
            let _ = self.close();
        }
        lock(&self.state).stats.connections_released += 1;
    }
}

pub struct MemorySession {
    state: SharedState,
}

impl Session for MemorySession {
    type Destination = MemoryTopic;
    type Consumer = MemoryConsumer;

    fn resolve_topic(&mut self, name: &str) -> Result<MemoryTopic, EndpointError> {
        if name.is_empty() {
            return Err(EndpointError::Subscribe("empty topic name".to_string()));
        }
        let mut state = lock(&self.state);
        state.topics.entry(name.to_string()).or_default();
        state.stats.destinations_resolved += 1;
        Ok(MemoryTopic {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }

    fn create_consumer(&mut self, destination: &MemoryTopic) -> Result<MemoryConsumer, EndpointError> {
        let id = Uuid::new_v4().to_string();
        let (fault, observers) = {
            let mut state = lock(&self.state);
            state
                .topics
                .entry(destination.name.clone())
                .or_default()
                .insert(id.clone(), None);
            state.stats.consumers_created += 1;
            let observers: Vec<ExceptionObserver> = state.observers.values().cloned().collect();
            (state.setup_fault.take(), observers)
        };
        if let Some(fault) = fault {
            for observer in &observers {
                observer(fault.clone());
            }
        }
        Ok(MemoryConsumer {
            id,
            topic: destination.name.clone(),
            state: self.state.clone(),
        })
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        lock(&self.state).stats.sessions_released += 1;
    }
}

pub struct MemoryTopic {
    name: String,
    state: SharedState,
}

impl MemoryTopic {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MemoryTopic {
    fn drop(&mut self) {
        lock(&self.state).stats.destinations_released += 1;
    }
}

pub struct MemoryConsumer {
    id: ConsumerId,
    topic: String,
    state: SharedState,
}

impl Consumer for MemoryConsumer {
    fn on_message(&mut self, callback: MessageCallback) -> Result<(), EndpointError> {
        let mut state = lock(&self.state);
        let slot = state
            .topics
            .get_mut(&self.topic)
            .and_then(|consumers| consumers.get_mut(&self.id))
            .ok_or_else(|| EndpointError::Subscribe(format!("consumer {} detached", self.id)))?;
        *slot = Some(callback);
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(consumers) = state.topics.get_mut(&self.topic) {
            consumers.remove(&self.id);
        }
        state.stats.consumers_released += 1;
    }
}
