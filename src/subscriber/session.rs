//! Subscription session orchestrator.
//!
//! Lifecycle:
//! `Idle -> Connecting -> SettingUp -> Ready -> Draining -> Closed`, or
//! `Connecting | SettingUp -> Failed`.
//!
//! The readiness gate is opened on both the success and the failure path.
//! Endpoint handles are released in reverse acquisition order exactly once,
//! however the session ends.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::handler::MessageHandler;
use super::observer::MessageObserver;
use super::progress::Progress;
use crate::app::{EXIT_ABORTED, EXIT_OK};
use crate::codec::Decompressor;
use crate::endpoint::{
    Connection, Consumer, Credentials, ExceptionObserver, MessagingEndpoint, Session,
};
use crate::sync::WaitOutcome;
use crate::utils::error::EndpointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    SettingUp,
    Ready,
    Draining,
    Closed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The expected number of messages was processed.
    Completed,
    /// The wait timeout elapsed first.
    TimedOut,
    /// A fatal transport fault cut the session short.
    Aborted(EndpointError),
    /// Connecting or subscribing failed.
    Failed(EndpointError),
}

impl SessionOutcome {
    /// Only a transport fault is reported as a process failure; setup
    /// failures and timeouts still end the run normally.
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionOutcome::Aborted(_) => EXIT_ABORTED,
            _ => EXIT_OK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub received: usize,
    pub decoded: usize,
    pub failed: usize,
    /// Completion count still outstanding when the session ended.
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub credentials: Credentials,
    pub topic: String,
    pub expected_messages: usize,
    pub wait_timeout: Duration,
    pub decompressor: Decompressor,
}

/// Endpoint handles acquired during setup. Any of them may be missing if
/// setup stopped part way.
struct SubscriptionSession<C: Connection> {
    connection: Option<C>,
    session: Option<C::Session>,
    destination: Option<<C::Session as Session>::Destination>,
    consumer: Option<<C::Session as Session>::Consumer>,
}

impl<C: Connection> SubscriptionSession<C> {
    fn new() -> Self {
        Self {
            connection: None,
            session: None,
            destination: None,
            consumer: None,
        }
    }

    /// Close the connection, then drop consumer, destination, session and
    /// connection in that order. A second call finds nothing left to do.
    fn teardown(&mut self) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        info!("cleaning up subscription");
        if let Err(err) = connection.close() {
            warn!("error closing connection: {err}");
        }
        drop(self.consumer.take());
        drop(self.destination.take());
        drop(self.session.take());
        drop(self.connection.take());
    }
}

impl<C: Connection> Drop for SubscriptionSession<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

pub struct Subscriber<E: MessagingEndpoint> {
    endpoint: E,
    config: SessionConfig,
    observer: Arc<dyn MessageObserver>,
    progress: Arc<Progress>,
    state: Mutex<SessionState>,
    fault: Arc<Mutex<Option<EndpointError>>>,
}

impl<E: MessagingEndpoint> Subscriber<E> {
    pub fn new(endpoint: E, config: SessionConfig, observer: Arc<dyn MessageObserver>) -> Self {
        let progress = Arc::new(Progress::new(config.expected_messages));
        Self {
            endpoint,
            config,
            observer,
            progress,
            state: Mutex::new(SessionState::Idle),
            fault: Arc::new(Mutex::new(None)),
        }
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.progress.clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(from = ?*state, to = ?next, "session state change");
        *state = next;
    }

    /// Runs the whole session on the calling thread and reports how it ended.
    pub fn run(&self) -> SessionReport {
        let mut resources = SubscriptionSession::<E::Connection>::new();

        let outcome = match self.establish(&mut resources) {
            Ok(()) => {
                self.transition(SessionState::Ready);
                self.progress.gate.open();
                info!(topic = %self.config.topic, "subscription live, waiting for messages");
                self.transition(SessionState::Draining);
                self.drain()
            }
            Err(err) => {
                self.transition(SessionState::Failed);
                self.progress.gate.open();
                error!("subscription setup failed: {err}");
                SessionOutcome::Failed(err)
            }
        };

        resources.teardown();
        if self.state() != SessionState::Failed {
            self.transition(SessionState::Closed);
        }

        SessionReport {
            outcome,
            received: self.progress.received(),
            decoded: self.progress.decoded(),
            failed: self.progress.failed(),
            remaining: self.progress.counter.count(),
        }
    }

    fn establish(
        &self,
        resources: &mut SubscriptionSession<E::Connection>,
    ) -> Result<(), EndpointError> {
        self.transition(SessionState::Connecting);
        let connection = resources
            .connection
            .insert(self.endpoint.connect(&self.config.credentials)?);
        connection.start()?;
        connection.set_exception_observer(self.exception_observer());

        self.transition(SessionState::SettingUp);
        let session = resources.session.insert(connection.create_session()?);
        let destination = resources
            .destination
            .insert(session.resolve_topic(&self.config.topic)?);
        let consumer = resources
            .consumer
            .insert(session.create_consumer(destination)?);

        let handler = Arc::new(MessageHandler::new(
            self.progress.clone(),
            self.config.decompressor.clone(),
            self.observer.clone(),
        ));
        consumer.on_message(handler.into_callback())
    }

    /// A fatal transport fault is recorded and wakes the drain wait.
    fn exception_observer(&self) -> ExceptionObserver {
        let progress = self.progress.clone();
        let fault = self.fault.clone();
        Arc::new(move |err: EndpointError| {
            error!("transport fault, abandoning session: {err}");
            fault
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert(err);
            progress.counter.abort();
        })
    }

    fn drain(&self) -> SessionOutcome {
        match self.progress.counter.wait_until_zero(self.config.wait_timeout) {
            WaitOutcome::Completed => {
                info!(
                    received = self.progress.received(),
                    "all expected messages processed"
                );
                SessionOutcome::Completed
            }
            WaitOutcome::TimedOut => {
                warn!(
                    received = self.progress.received(),
                    remaining = self.progress.counter.count(),
                    timeout_ms = self.config.wait_timeout.as_millis() as u64,
                    "timed out waiting for messages"
                );
                SessionOutcome::TimedOut
            }
            WaitOutcome::Aborted => {
                let fault = self
                    .fault
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .unwrap_or_else(|| EndpointError::Transport("session aborted".to_string()));
                SessionOutcome::Aborted(fault)
            }
        }
    }
}

impl<E> Subscriber<E>
where
    E: MessagingEndpoint + Send + 'static,
{
    /// Runs the session on a dedicated worker thread.
    pub fn spawn(self) -> std::io::Result<SubscriberHandle> {
        let progress = self.progress.clone();
        let join = thread::Builder::new()
            .name("feedsub-worker".to_string())
            .spawn(move || self.run())?;
        Ok(SubscriberHandle { progress, join })
    }
}

pub struct SubscriberHandle {
    progress: Arc<Progress>,
    join: JoinHandle<SessionReport>,
}

impl SubscriberHandle {
    /// Blocks until setup has finished, successfully or not.
    pub fn wait_until_ready(&self) {
        self.progress.gate.wait();
    }

    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    pub fn join(self) -> thread::Result<SessionReport> {
        self.join.join()
    }
}
