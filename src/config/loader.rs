//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults (applied by [`Config::resolve`])
//! 2. User config: `~/.config/focus-guard/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! Every value is a scalar, so later sources simply override earlier ones.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::{AppsSection, AuditSection, Config, ProxySection, RulesSection, SystemSection};
use crate::cli::Cli;

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "focus-guard";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with the default user config path.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with a custom user config path (for testing).
    #[must_use]
    pub fn with_user_path(user_path: PathBuf) -> Self {
        Self { user_path }
    }

    /// Path of the user config file this loader reads.
    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    /// Load and merge configuration from all sources.
    ///
    /// A missing user config is skipped. A missing `--config` file is an
    /// error, as is invalid TOML anywhere.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        let mut config = Config::default();

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(cli_config) => {
                    config.merge(cli_config);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    return Err(ConfigError::ReadError {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        config.merge(cli_overrides(cli));
        Ok(config)
    }

    /// Load a config file, returning None if it doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Config =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate CLI flags into a config overlay.
fn cli_overrides(cli: &Cli) -> Config {
    let flag = |set: bool| set.then_some(true);

    Config {
        proxy: ProxySection {
            http_port: cli.proxy_port,
            socks_port: cli.socks_port,
            pac_port: cli.pac_port,
            ..Default::default()
        },
        audit: AuditSection {
            path: cli.log.clone(),
            ..Default::default()
        },
        apps: AppsSection {
            enabled: cli.no_apps.then_some(false),
            mode: cli.app_mode.clone(),
            dry_run: flag(cli.dry_run),
            ..Default::default()
        },
        rules: RulesSection {
            blocklist: cli.blocklist.clone(),
        },
        system: SystemSection {
            enable_pac: flag(cli.enable_pac),
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn parse_cli(args: &[&str]) -> Cli {
        let mut argv = vec!["focus-guard"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_load_without_any_files() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_user_path(dir.path().join("config.toml"));

        let config = loader.load(&parse_cli(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_user_config_then_cli_file_then_flags() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("config.toml");
        std::fs::write(
            &user_path,
            "[proxy]\nhttp_port = 8888\nsocks_port = 9999\n[apps]\nmode = \"strict\"\n",
        )
        .unwrap();

        let extra_path = dir.path().join("extra.toml");
        std::fs::write(&extra_path, "[proxy]\nsocks_port = 7777\n").unwrap();

        let loader = ConfigLoader::with_user_path(user_path);
        let cli = parse_cli(&[
            "--config",
            extra_path.to_str().unwrap(),
            "--proxy-port",
            "0",
            "--no-apps",
        ]);
        let config = loader.load(&cli).unwrap();

        assert_eq!(config.proxy.http_port, Some(0));
        assert_eq!(config.proxy.socks_port, Some(7777));
        assert_eq!(config.apps.mode.as_deref(), Some("strict"));
        assert_eq!(config.apps.enabled, Some(false));
    }

    #[test]
    fn test_unset_flags_do_not_override() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("config.toml");
        std::fs::write(&user_path, "[system]\nenable_pac = true\n[apps]\ndry_run = true\n")
            .unwrap();

        let loader = ConfigLoader::with_user_path(user_path);
        let config = loader.load(&parse_cli(&[])).unwrap();

        assert_eq!(config.system.enable_pac, Some(true));
        assert_eq!(config.apps.dry_run, Some(true));
    }

    #[test]
    fn test_missing_cli_config_is_error() {
        let dir = tempdir().unwrap();
        let loader = ConfigLoader::with_user_path(dir.path().join("config.toml"));
        let cli = parse_cli(&["--config", "/nonexistent/focus-guard.toml"]);

        let result = loader.load(&cli);
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = tempdir().unwrap();
        let user_path = dir.path().join("config.toml");
        std::fs::write(&user_path, "[proxy\nhttp_port = ").unwrap();

        let loader = ConfigLoader::with_user_path(user_path);
        let result = loader.load(&parse_cli(&[]));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
