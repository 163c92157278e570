//! Process-wide delivery runtime.
//!
//! Endpoints run their socket I/O and invoke message callbacks on a tokio
//! multi-thread runtime. The entry point acquires it once before the session
//! starts and releases it after the session has fully stopped. At most one
//! may be alive at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::utils::error::RuntimeError;

static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Grace period for in-flight deliveries at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct DeliveryRuntime {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl DeliveryRuntime {
    pub fn initialize() -> Result<Self, RuntimeError> {
        if ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyInitialized);
        }
        let runtime = Builder::new_multi_thread()
            .thread_name("feedsub-delivery")
            .enable_all()
            .build()
            .inspect_err(|_| ACTIVE.store(false, Ordering::SeqCst))?;
        debug!("delivery runtime initialized");
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    pub fn is_active() -> bool {
        ACTIVE.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }
}

impl Drop for DeliveryRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
        }
        ACTIVE.store(false, Ordering::SeqCst);
        debug!("delivery runtime shut down");
    }
}
