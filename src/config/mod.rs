mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerSettings, LoggingSettings, PartialSettings, SessionSettings, Settings, WillSettings,
};

/// Prefix of environment overrides, e.g. `MQRELAY_BROKER__ENDPOINT`.
pub const ENV_PREFIX: &str = "MQRELAY";

/// Reads `config/default.*` (optional) and `MQRELAY_*` overrides, then fills
/// whatever neither provides from [`Settings::default`].
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merged(partial))
}
