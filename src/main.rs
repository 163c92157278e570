//! CLI for feedsub
//!
//! Loads settings, brings up the delivery runtime, runs one bounded
//! subscription against the configured broker and exits with its status.

use std::process::ExitCode;

use clap::Parser;
use feedsub::app::{self, Cli, EXIT_INTERNAL};
use feedsub::config::load_config_from;
use feedsub::endpoint::WsEndpoint;
use feedsub::runtime::DeliveryRuntime;
use feedsub::utils::logging;
use tracing::{error, info};

fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let settings = load_config_from(cli.config.as_deref()).map(|s| cli.apply(s));

    let level = match &settings {
        Ok(settings) => settings.logging.level.as_str(),
        Err(_) => cli.log_level.as_deref().unwrap_or("info"),
    };
    logging::init(level);
    info!("feedsub starting");

    let runtime = match DeliveryRuntime::initialize() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to initialize delivery runtime: {e}");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    let code = app::launch(settings, |settings| {
        WsEndpoint::new(runtime.handle()).with_connect_timeout(settings.connect_timeout())
    });
    drop(runtime);

    info!(code, "feedsub exiting");
    ExitCode::from(code)
}
