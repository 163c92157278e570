//! # feedsub
//!
//! `feedsub` subscribes to a topic on a message broker, decompresses the
//! gzip payloads it receives and shuts down cleanly once an expected number
//! of messages has been handled or a wait timeout expires.
//!
//! ## Core Modules
//!
//! - `app`: Entry-point wiring and the command line.
//! - `codec`: Gzip decompression with a bounded output buffer.
//! - `config`: Layered configuration (file, environment, Darwin credentials).
//! - `endpoint`: The messaging endpoint abstraction plus in-memory and WebSocket implementations.
//! - `runtime`: The process-wide runtime that delivers messages.
//! - `subscriber`: The message handler and the session orchestrator.
//! - `sync`: The readiness gate and the completion counter.
//! - `utils`: Error types and logging.

pub mod app;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod runtime;
pub mod subscriber;
pub mod sync;
pub mod utils;
