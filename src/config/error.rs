//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during configuration and ruleset loading.
///
/// All of these abort startup: the daemon never runs with a partially loaded
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse a TOML configuration file.
    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the file that couldn't be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },

    /// Failed to parse the JSON ruleset.
    #[error("Failed to parse ruleset {path}: {source}")]
    RulesetParse {
        /// Path to the ruleset file.
        path: PathBuf,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// A rule in the ruleset is malformed.
    #[error("Invalid rule '{rule}': {message}")]
    InvalidRule {
        /// The offending rule text.
        rule: String,
        /// Description of why the rule is invalid.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("Invalid config value for {field}: {message}")]
    InvalidValue {
        /// The field name that has an invalid value.
        field: String,
        /// Description of why the value is invalid.
        message: String,
    },
}
