mod settings;

use config::{Config, Environment, File};

pub use settings::{
    BrokerSettings, LoggingSettings, PartialSettings, SessionSettings, Settings,
    SubscriberSettings,
};

use crate::utils::error::SettingsError;

/// Suffix appended to `HOSTNAME` to build the default client id.
const CLIENT_ID_SUFFIX: &str = "feedsub";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, SettingsError> {
    load_config_from(None)
}

/// Layers, lowest priority first:
/// - built-in defaults
/// - `path` (required) or `config/default.*` (optional)
/// - `FEEDSUB_*` variables, `__` between sections (`FEEDSUB_BROKER__PORT`)
/// - `DARWIN_USERNAME` / `DARWIN_PASS`
///
/// When no client id is configured it is derived from `HOSTNAME`.
pub fn load_config_from(path: Option<&str>) -> Result<Settings, SettingsError> {
    let file = match path {
        Some(path) => File::with_name(path).required(true),
        None => File::with_name("config/default").required(false),
    };
    let builder = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix("FEEDSUB")
                .prefix_separator("_")
                .separator("__"),
        )
        .set_override_option("subscriber.username", non_empty_env("DARWIN_USERNAME"))?
        .set_override_option("subscriber.password", non_empty_env("DARWIN_PASS"))?;

    let config = builder.build()?;
    let mut partial: PartialSettings = config.try_deserialize()?;

    let subscriber = partial.subscriber.get_or_insert_with(Default::default);
    if subscriber.client_id.is_none() {
        subscriber.client_id = Some(default_client_id(non_empty_env("HOSTNAME")));
    }

    Ok(Settings::merge(partial))
}

fn default_client_id(hostname: Option<String>) -> String {
    match hostname {
        Some(host) => format!("{host}.{CLIENT_ID_SUFFIX}"),
        None => CLIENT_ID_SUFFIX.to_string(),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
