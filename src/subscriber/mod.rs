//! The `subscriber` module is the reception pipeline: the per-message handler,
//! the progress it reports into, the observer that receives decoded messages,
//! and the session orchestrator that ties them to an endpoint.

pub mod handler;
pub mod observer;
pub mod progress;
pub mod session;

pub use handler::MessageHandler;
pub use observer::{DecodedMessage, LogObserver, MessageObserver};
pub use progress::Progress;
pub use session::{
    SessionConfig, SessionOutcome, SessionReport, SessionState, Subscriber, SubscriberHandle,
};

#[cfg(test)]
mod tests;
