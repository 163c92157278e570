//! Error types shared across the subscriber.
//!
//! Each layer has its own enum so callers can tell configuration problems,
//! setup failures, per-message failures and transport faults apart.

use std::num::ParseIntError;

use thiserror::Error;

/// Failure while turning a gzip body into text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The input is not a gzip stream (bad magic, method or too short).
    #[error("gzip stream init failed: {0}")]
    InitFailed(String),
    /// The deflate data, CRC or length trailer was rejected by the decoder.
    #[error("gzip inflate failed: {0}")]
    InflateFailed(String),
    /// Decompressed output would not fit the allowed capacity.
    #[error("decompressed payload exceeds {capacity} bytes")]
    CapacityExceeded { capacity: usize },
}

/// Recoverable failure while handling one inbound message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message is not a bytes message (got {0})")]
    NotBytes(&'static str),
    #[error("message has no content-length property")]
    MissingContentLength,
    #[error("invalid content-length {value:?}: {source}")]
    InvalidContentLength {
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("message processing panicked: {0}")]
    Panicked(String),
}

/// Errors raised by a messaging endpoint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("session setup failed: {0}")]
    Session(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("transport fault: {0}")]
    Transport(String),
    #[error("connection already closed")]
    Closed,
}

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("configuration error: {0}")]
    Source(#[from] config::ConfigError),
}

/// Errors from the process-wide delivery runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("delivery runtime already initialized")]
    AlreadyInitialized,
    #[error("failed to build delivery runtime: {0}")]
    Build(#[from] std::io::Error),
}
