//! Entry-point wiring: validate settings, build the endpoint, run the
//! subscription on a worker thread and turn the result into an exit status.

pub mod cli;

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Settings;
use crate::endpoint::MessagingEndpoint;
use crate::subscriber::{LogObserver, MessageObserver, Subscriber};
use crate::utils::error::SettingsError;

pub use cli::Cli;

pub const EXIT_OK: u8 = 0;
pub const EXIT_CONFIG: u8 = 1;
pub const EXIT_INTERNAL: u8 = 1;
pub const EXIT_ABORTED: u8 = 2;

/// Validates `settings` and, only if they are usable, builds an endpoint with
/// `make_endpoint` and runs a session against it.
pub fn launch<E, F>(settings: Result<Settings, SettingsError>, make_endpoint: F) -> u8
where
    E: MessagingEndpoint + Send + 'static,
    F: FnOnce(&Settings) -> E,
{
    launch_with_observer(settings, make_endpoint, Arc::new(LogObserver))
}

pub fn launch_with_observer<E, F>(
    settings: Result<Settings, SettingsError>,
    make_endpoint: F,
    observer: Arc<dyn MessageObserver>,
) -> u8
where
    E: MessagingEndpoint + Send + 'static,
    F: FnOnce(&Settings) -> E,
{
    let settings = match settings.and_then(|s| s.validate().map(|()| s)) {
        Ok(settings) => settings,
        Err(err) => {
            error!("{err}");
            return EXIT_CONFIG;
        }
    };

    let endpoint = make_endpoint(&settings);
    run_session(&settings, endpoint, observer)
}

fn run_session<E>(settings: &Settings, endpoint: E, observer: Arc<dyn MessageObserver>) -> u8
where
    E: MessagingEndpoint + Send + 'static,
{
    info!(
        broker = %settings.broker_address(),
        topic = %settings.broker.topic,
        expected = settings.session.expected_messages,
        timeout_ms = settings.session.wait_timeout_ms,
        "starting subscriber"
    );

    let handle = match Subscriber::new(endpoint, settings.session_config(), observer).spawn() {
        Ok(handle) => handle,
        Err(err) => {
            error!("failed to start subscriber thread: {err}");
            return EXIT_INTERNAL;
        }
    };

    handle.wait_until_ready();
    match handle.join() {
        Ok(report) => {
            info!(
                outcome = ?report.outcome,
                received = report.received,
                decoded = report.decoded,
                failed = report.failed,
                remaining = report.remaining,
                "session finished"
            );
            report.outcome.exit_code()
        }
        Err(_) => {
            error!("subscriber thread panicked");
            EXIT_INTERNAL
        }
    }
}
