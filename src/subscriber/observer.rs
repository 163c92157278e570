use chrono::{DateTime, Utc};
use tracing::info;

/// A successfully decoded message together with its delivery metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// Position in the order messages were received, starting at 1.
    pub ordinal: usize,
    pub message_type: String,
    pub message_id: String,
    pub properties: Vec<(String, String)>,
    pub body_len: usize,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

/// Receives decoded messages. Called from delivery threads, possibly
/// concurrently.
pub trait MessageObserver: Send + Sync {
    fn on_decoded(&self, message: &DecodedMessage);
}

/// Writes each decoded message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl MessageObserver for LogObserver {
    fn on_decoded(&self, message: &DecodedMessage) {
        info!(
            ordinal = message.ordinal,
            message_type = %message.message_type,
            message_id = %message.message_id,
            received_at = %message.received_at.to_rfc3339(),
            "message received"
        );
        for (name, value) in &message.properties {
            info!(ordinal = message.ordinal, "-- {name}: {value}");
        }
        info!(
            ordinal = message.ordinal,
            body_len = message.body_len,
            "-- content: {}",
            message.content
        );
    }
}
