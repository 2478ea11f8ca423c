//! Layered configuration loading

use ::config::{Config, Environment, File, FileFormat};
use std::path::Path;
use tracing::debug;

use super::{ComposerConfig, ConfigResult};

const ENV_PREFIX: &str = "COMPOSER";
const ENV_SEPARATOR: &str = "__";

impl ComposerConfig {
    /// Load defaults, then `path` (TOML) if given, then environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .list_separator(",")
                .with_list_parse_key("retry.retryable_codes")
                .try_parsing(true),
        );

        let config: ComposerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
