//! Synchronization primitives shared by the subscription worker and the
//! endpoint delivery threads.

pub mod countdown;
pub mod gate;

pub use countdown::{CompletionCounter, WaitOutcome};
pub use gate::ReadinessGate;
