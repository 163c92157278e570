//! Per-message callback.
//!
//! Every invocation counts the message, tries to decode it and hands the
//! result to the observer. Whatever happens, including a panic inside the
//! decode path, the completion counter is decremented exactly once.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use super::observer::{DecodedMessage, MessageObserver};
use super::progress::Progress;
use crate::codec::Decompressor;
use crate::endpoint::{InboundMessage, MessageBody, MessageCallback};
use crate::sync::CompletionCounter;
use crate::utils::error::MessageError;

/// Property carrying the declared uncompressed size of the body.
pub const CONTENT_LENGTH: &str = "content-length";

/// Body bytes shown in the debug hex dump before it is cut short.
const HEX_PREVIEW_BYTES: usize = 256;

pub struct MessageHandler {
    progress: Arc<Progress>,
    decompressor: Decompressor,
    observer: Arc<dyn MessageObserver>,
}

/// Decrements the counter when dropped, so every exit path counts once.
struct CountdownGuard<'a>(&'a CompletionCounter);

impl Drop for CountdownGuard<'_> {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

impl MessageHandler {
    pub fn new(
        progress: Arc<Progress>,
        decompressor: Decompressor,
        observer: Arc<dyn MessageObserver>,
    ) -> Self {
        Self {
            progress,
            decompressor,
            observer,
        }
    }

    /// Wraps the handler as an endpoint callback.
    pub fn into_callback(self: Arc<Self>) -> MessageCallback {
        Arc::new(move |message| self.handle(message))
    }

    pub fn handle(&self, message: InboundMessage) {
        let _countdown = CountdownGuard(&self.progress.counter);
        let ordinal = self.progress.record_received();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let decoded = self.decode(ordinal, &message)?;
            self.observer.on_decoded(&decoded);
            Ok::<(), MessageError>(())
        }))
        .unwrap_or_else(|payload| Err(MessageError::Panicked(panic_message(&*payload))));

        match result {
            Ok(()) => self.progress.record_decoded(),
            Err(err @ MessageError::Panicked(_)) => {
                self.progress.record_failed();
                error!(ordinal, message_id = %message.message_id, "{err}");
            }
            Err(err) => {
                self.progress.record_failed();
                warn!(ordinal, message_id = %message.message_id, "skipping message: {err}");
            }
        }
    }

    fn decode(&self, ordinal: usize, message: &InboundMessage) -> Result<DecodedMessage, MessageError> {
        let MessageBody::Bytes(body) = &message.body else {
            return Err(MessageError::NotBytes(message.body.kind()));
        };
        debug!(
            ordinal,
            body_len = body.len(),
            "-- body bytes: {}",
            hex_preview(body)
        );

        let raw = message
            .property(CONTENT_LENGTH)
            .ok_or(MessageError::MissingContentLength)?;
        let declared = raw
            .trim()
            .parse::<usize>()
            .map_err(|source| MessageError::InvalidContentLength {
                value: raw.to_string(),
                source,
            })?;

        let content = self.decompressor.decompress(body, declared)?;

        Ok(DecodedMessage {
            ordinal,
            message_type: message.message_type.clone(),
            message_id: message.message_id.clone(),
            properties: message.properties.clone(),
            body_len: body.len(),
            content,
            received_at: Utc::now(),
        })
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    let mut out = bytes
        .iter()
        .take(HEX_PREVIEW_BYTES)
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ");
    if bytes.len() > HEX_PREVIEW_BYTES {
        out.push_str(" ...");
    }
    out
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
