use std::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::{CompletionCounter, ReadinessGate};

/// Progress shared between the subscription worker and the delivery threads.
#[derive(Debug)]
pub struct Progress {
    pub gate: ReadinessGate,
    pub counter: CompletionCounter,
    received: AtomicUsize,
    decoded: AtomicUsize,
    failed: AtomicUsize,
}

impl Progress {
    pub fn new(expected_messages: usize) -> Self {
        Self {
            gate: ReadinessGate::new(),
            counter: CompletionCounter::new(expected_messages),
            received: AtomicUsize::new(0),
            decoded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Returns the 1-based ordinal of the message just received.
    pub(crate) fn record_received(&self) -> usize {
        self.received.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn record_decoded(&self) {
        self.decoded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    pub fn decoded(&self) -> usize {
        self.decoded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}
