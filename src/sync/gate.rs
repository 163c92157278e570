use std::sync::{Condvar, Mutex, PoisonError};

/// One-shot gate: closed until `open` is called, then open forever.
///
/// The subscription worker opens it once setup has either succeeded or failed,
/// so waiters never hang on a broken setup.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    opened: Mutex<bool>,
    cond: Condvar,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate and wakes every waiter. Returns `false` if it was
    /// already open.
    pub fn open(&self) -> bool {
        let mut opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        if *opened {
            return false;
        }
        *opened = true;
        self.cond.notify_all();
        true
    }

    /// Blocks until the gate is open. Returns immediately if it already is.
    pub fn wait(&self) {
        let opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner);
        let _opened = self
            .cond
            .wait_while(opened, |opened| !*opened)
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub fn is_open(&self) -> bool {
        *self.opened.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
