use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::{CapacityPolicy, Decompressor};
use crate::endpoint::Credentials;
use crate::subscriber::SessionConfig;
use crate::utils::error::SettingsError;

/// Top-level configuration settings for the subscriber.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub subscriber: SubscriberSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

/// Where the broker lives and which topic to follow.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub topic: String,
}

/// Identity presented to the broker.
#[derive(Deserialize, Clone)]
pub struct SubscriberSettings {
    pub username: String,
    pub password: String,
    pub client_id: String,
}

impl fmt::Debug for SubscriberSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSettings")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("client_id", &self.client_id)
            .finish()
    }
}

/// How long to listen and how to decode.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    pub wait_timeout_ms: u64,
    /// Bound on connecting and logging in; falls back to `wait_timeout_ms`.
    pub connect_timeout_ms: Option<u64>,
    pub expected_messages: usize,
    pub buffer_multiplier: usize,
    pub capacity_policy: CapacityPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration loaded from files or environment. Missing values
/// are filled from `Settings::default()`.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub subscriber: Option<PartialSubscriberSettings>,
    pub session: Option<PartialSessionSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialBrokerSettings {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub topic: Option<String>,
}

#[derive(Default, Deserialize)]
pub struct PartialSubscriberSettings {
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
}

impl fmt::Debug for PartialSubscriberSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartialSubscriberSettings")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialSessionSettings {
    pub wait_timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub expected_messages: Option<usize>,
    pub buffer_multiplier: Option<usize>,
    pub capacity_policy: Option<CapacityPolicy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                scheme: "ws".to_string(),
                host: "127.0.0.1".to_string(),
                port: 8080,
                topic: "darwin.pushport-v16".to_string(),
            },
            subscriber: SubscriberSettings {
                username: String::new(),
                password: String::new(),
                client_id: "feedsub".to_string(),
            },
            session: SessionSettings {
                wait_timeout_ms: 15_000,
                connect_timeout_ms: None,
                expected_messages: 100,
                buffer_multiplier: crate::codec::gzip::DEFAULT_BUFFER_MULTIPLIER,
                capacity_policy: CapacityPolicy::Grow,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fill every missing value in `partial` from the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let broker = partial.broker.unwrap_or_default();
        let subscriber = partial.subscriber.unwrap_or_default();
        let session = partial.session.unwrap_or_default();
        let logging = partial.logging.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                scheme: broker.scheme.unwrap_or(default.broker.scheme),
                host: broker.host.unwrap_or(default.broker.host),
                port: broker.port.unwrap_or(default.broker.port),
                topic: broker.topic.unwrap_or(default.broker.topic),
            },
            subscriber: SubscriberSettings {
                username: subscriber.username.unwrap_or(default.subscriber.username),
                password: subscriber.password.unwrap_or(default.subscriber.password),
                client_id: subscriber.client_id.unwrap_or(default.subscriber.client_id),
            },
            session: SessionSettings {
                wait_timeout_ms: session
                    .wait_timeout_ms
                    .unwrap_or(default.session.wait_timeout_ms),
                connect_timeout_ms: session
                    .connect_timeout_ms
                    .or(default.session.connect_timeout_ms),
                expected_messages: session
                    .expected_messages
                    .unwrap_or(default.session.expected_messages),
                buffer_multiplier: session
                    .buffer_multiplier
                    .unwrap_or(default.session.buffer_multiplier),
                capacity_policy: session
                    .capacity_policy
                    .unwrap_or(default.session.capacity_policy),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }

    /// Rejects configurations that cannot possibly run. Nothing has touched
    /// the network when this fails.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.subscriber.username.trim().is_empty() {
            return Err(SettingsError::Missing("DARWIN_USERNAME"));
        }
        if self.subscriber.password.is_empty() {
            return Err(SettingsError::Missing("DARWIN_PASS"));
        }
        if self.broker.host.trim().is_empty() {
            return Err(SettingsError::Missing("broker.host"));
        }
        if self.broker.topic.trim().is_empty() {
            return Err(SettingsError::Missing("broker.topic"));
        }
        if self.session.buffer_multiplier == 0 {
            return Err(SettingsError::Invalid {
                field: "session.buffer_multiplier",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn broker_address(&self) -> String {
        format!(
            "{}://{}:{}",
            self.broker.scheme, self.broker.host, self.broker.port
        )
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            address: self.broker_address(),
            client_id: self.subscriber.client_id.clone(),
            username: self.subscriber.username.clone(),
            password: self.subscriber.password.clone(),
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.session.wait_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(
            self.session
                .connect_timeout_ms
                .unwrap_or(self.session.wait_timeout_ms),
        )
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            credentials: self.credentials(),
            topic: self.broker.topic.clone(),
            expected_messages: self.session.expected_messages,
            wait_timeout: self.wait_timeout(),
            decompressor: Decompressor::new(
                self.session.buffer_multiplier,
                self.session.capacity_policy,
            ),
        }
    }
}
