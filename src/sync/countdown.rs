use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// How a `wait_until_zero` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed,
    TimedOut,
    Aborted,
}

#[derive(Debug)]
struct CountState {
    remaining: usize,
    aborted: bool,
}

/// Countdown latch bounding how many messages a session waits for.
///
/// `decrement` may be called from any number of delivery threads. The count
/// saturates at zero, so extra deliveries past the target are harmless.
#[derive(Debug)]
pub struct CompletionCounter {
    state: Mutex<CountState>,
    cond: Condvar,
}

impl CompletionCounter {
    pub fn new(expected: usize) -> Self {
        Self {
            state: Mutex::new(CountState {
                remaining: expected,
                aborted: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn decrement(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.remaining == 0 {
            return;
        }
        state.remaining -= 1;
        if state.remaining == 0 {
            self.cond.notify_all();
        }
    }

    pub fn count(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remaining
    }

    /// Wakes any waiter with `WaitOutcome::Aborted`, even if the count is
    /// not yet zero.
    pub fn abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.aborted = true;
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .aborted
    }

    /// Blocks until the count hits zero, `abort` is called, or `timeout`
    /// elapses. Reaching zero wins over an abort that arrives at the same time.
    pub fn wait_until_zero(&self, timeout: Duration) -> WaitOutcome {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (state, _timeout) = self
            .cond
            .wait_timeout_while(state, timeout, |s| s.remaining > 0 && !s.aborted)
            .unwrap_or_else(PoisonError::into_inner);

        if state.remaining == 0 {
            WaitOutcome::Completed
        } else if state.aborted {
            WaitOutcome::Aborted
        } else {
            WaitOutcome::TimedOut
        }
    }
}
