//! Configuration file loading for coderunner
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.container_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "container_prefix must not be empty".to_string(),
            ));
        }
        if !self.working_dir.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "working_dir '{}' must be an absolute path",
                self.working_dir
            )));
        }

        for (id, lang) in &self.languages {
            if !is_valid_language_id(id) {
                return Err(ConfigError::Invalid(format!(
                    "language id '{id}' may only contain [a-z0-9_-]"
                )));
            }
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.image.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty image"
                )));
            }
            if lang.run.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
            match lang.compile {
                Some(ref compile) => {
                    if compile.command.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "language '{id}' has empty compile command"
                        )));
                    }
                    if !is_plain_file_name(&compile.source_name) {
                        return Err(ConfigError::Invalid(format!(
                            "language '{id}' source_name must be a plain file name"
                        )));
                    }
                }
                None => {
                    // Interpreted languages receive the program inline
                    if !lang.run.command.iter().any(|arg| arg.contains("{code}")) {
                        return Err(ConfigError::Invalid(format!(
                            "language '{id}' is interpreted but its run command has no {{code}} placeholder"
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Language IDs become part of container names
fn is_valid_language_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != "." && name != ".."
}
