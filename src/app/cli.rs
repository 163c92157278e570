use clap::Parser;

use crate::config::Settings;

/// Subscribe to a compressed message feed for a bounded time.
#[derive(Debug, Default, Parser)]
#[command(name = "feedsub", version)]
pub struct Cli {
    /// Configuration file (defaults to `config/default.*` if present)
    #[arg(long)]
    pub config: Option<String>,
    /// Topic to subscribe to
    #[arg(long)]
    pub topic: Option<String>,
    /// Number of messages to wait for before shutting down
    #[arg(long)]
    pub expected: Option<usize>,
    /// Give up waiting after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    /// Command line values win over every other configuration source.
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(topic) = &self.topic {
            settings.broker.topic = topic.clone();
        }
        if let Some(expected) = self.expected {
            settings.session.expected_messages = expected;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            settings.session.wait_timeout_ms = timeout_ms;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level = level.clone();
        }
        settings
    }
}
