mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, GatewaySettings, HttpSettings, LogSettings, PartialSettings, RadioSettings,
    ServerSettings, Settings,
};

/// Default location of the configuration file, extension resolved by `config`.
pub const DEFAULT_CONFIG: &str = "config/default";

/// Loads the configuration from the default file and environment variables.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from(DEFAULT_CONFIG, false)
}

/// Loads `path` (required when `required` is set), then `GATEWAY__SECTION__KEY`
/// environment variables on top, and merges the result with default values.
pub fn load_config_from(path: &str, required: bool) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(required))
        .add_source(Environment::with_prefix("GATEWAY").separator("__"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
