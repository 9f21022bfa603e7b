use serde::de::DeserializeOwned;

pub use config::ConfigError;

/// Environment variable prefix for all service configuration.
pub const ENV_PREFIX: &str = "CHAN";

/// Parses a config struct from an optional TOML file and the environment.
/// Environment variables take priority over the file, the file is optional.
pub fn parse<C: DeserializeOwned>(config_file: &str) -> Result<C, ConfigError> {
    let mut builder = config::Config::builder();

    if !config_file.is_empty() {
        builder = builder.add_source(config::File::with_name(config_file).required(false));
    }

    builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX))
        .build()?
        .try_deserialize()
}
