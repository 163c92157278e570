//! Shared helpers: error types and logging setup.

pub mod error;
pub mod logging;
