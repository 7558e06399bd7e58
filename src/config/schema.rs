//! Configuration schema definitions.
//!
//! Every field in a config file is optional. Files are layered with
//! [`Config::merge`]; unset values fall back to the defaults applied in
//! [`Config::resolve`], which also validates and converts units.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::appblock::{MIN_SCAN_INTERVAL, Mode};
use crate::proxy::{ConnectPolicy, ProxyLimits, RelayLimits};
use crate::telemetry::AuditFormat;

/// Default HTTP proxy port.
pub const DEFAULT_HTTP_PORT: u16 = 3128;
/// Default SOCKS5 proxy port.
pub const DEFAULT_SOCKS_PORT: u16 = 1080;
/// Default PAC responder port.
pub const DEFAULT_PAC_PORT: u16 = 18080;
/// Default listen address.
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
/// Default audit log location (relative to the working directory).
pub const DEFAULT_AUDIT_PATH: &str = "logs/traffic.log";
/// Default ruleset location (relative to the working directory).
pub const DEFAULT_BLOCKLIST_PATH: &str = "blocklist.json";

/// Root configuration structure, as read from a TOML file.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listener settings.
    #[serde(default)]
    pub proxy: ProxySection,

    /// Data-path timeouts.
    #[serde(default)]
    pub timeouts: TimeoutSection,

    /// Audit log settings.
    #[serde(default)]
    pub audit: AuditSection,

    /// Application blocker settings.
    #[serde(default)]
    pub apps: AppsSection,

    /// Ruleset location.
    #[serde(default)]
    pub rules: RulesSection,

    /// System integration.
    #[serde(default)]
    pub system: SystemSection,
}

/// `[proxy]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ProxySection {
    /// Address all listeners bind to.
    pub listen_host: Option<String>,
    /// HTTP proxy port (0 = ephemeral).
    pub http_port: Option<u16>,
    /// SOCKS5 proxy port (0 = ephemeral).
    pub socks_port: Option<u16>,
    /// PAC responder port (0 = ephemeral).
    pub pac_port: Option<u16>,
    /// Largest accepted HTTP request head.
    pub max_header_bytes: Option<usize>,
}

/// `[timeouts]` section. Durations are in seconds unless noted.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TimeoutSection {
    /// Time allowed to receive a complete HTTP request head.
    pub header_secs: Option<u64>,
    /// Per-read timeout during the SOCKS5 handshake.
    pub handshake_secs: Option<u64>,
    /// Per-attempt upstream connect timeout.
    pub connect_secs: Option<u64>,
    /// Extra connect attempts after the first.
    pub connect_retries: Option<u32>,
    /// Fixed delay between connect attempts, in milliseconds.
    pub retry_backoff_ms: Option<u64>,
    /// Relay idle timeout per read/write.
    pub idle_secs: Option<u64>,
    /// Overall relay session cap.
    pub session_max_secs: Option<u64>,
}

/// `[audit]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AuditSection {
    /// Audit file path.
    pub path: Option<PathBuf>,
    /// `text` or `json`.
    pub format: Option<String>,
}

/// `[apps]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct AppsSection {
    /// Run the app blocker at all.
    pub enabled: Option<bool>,
    /// `polite` or `strict`.
    pub mode: Option<String>,
    /// Strict-mode wait before force-killing.
    pub grace_seconds: Option<f64>,
    /// Delay between process scans.
    pub scan_interval_secs: Option<f64>,
    /// Log matches without terminating anything.
    pub dry_run: Option<bool>,
}

/// `[rules]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RulesSection {
    /// Path to the JSON ruleset.
    pub blocklist: Option<PathBuf>,
}

/// `[system]` section.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SystemSection {
    /// Point the OS proxy auto-config at our PAC responder while running.
    pub enable_pac: Option<bool>,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Address all listeners bind to.
    pub listen_host: IpAddr,
    /// Requested HTTP proxy port.
    pub http_port: u16,
    /// Requested SOCKS5 proxy port.
    pub socks_port: u16,
    /// Requested PAC responder port.
    pub pac_port: u16,
    /// Data-path limits shared by both proxies.
    pub limits: ProxyLimits,
    /// Audit file path.
    pub audit_path: PathBuf,
    /// Audit line format.
    pub audit_format: AuditFormat,
    /// Ruleset path.
    pub blocklist_path: PathBuf,
    /// App blocker settings.
    pub apps: AppSettings,
    /// Whether to set the system PAC pointer.
    pub enable_pac: bool,
}

/// Resolved app blocker settings.
#[derive(Debug, Clone)]
pub struct AppSettings {
    /// Run the app blocker at all.
    pub enabled: bool,
    /// Termination policy.
    pub mode: Mode,
    /// Strict-mode grace period.
    pub grace: Duration,
    /// Scan interval.
    pub interval: Duration,
    /// Log-only mode.
    pub dry_run: bool,
}

impl Config {
    /// Merge another config into this one. Values set in `other` win.
    pub fn merge(&mut self, other: Config) {
        self.proxy.merge(other.proxy);
        self.timeouts.merge(other.timeouts);
        self.audit.merge(other.audit);
        self.apps.merge(other.apps);
        self.rules.merge(other.rules);
        self.system.merge(other.system);
    }

    /// Apply defaults, validate, and convert to runtime settings.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let host = self
            .proxy
            .listen_host
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN_HOST);
        let listen_host: IpAddr = host.parse().map_err(|_| ConfigError::InvalidValue {
            field: "proxy.listen_host".to_string(),
            message: format!("'{}' is not an IP address", host),
        })?;

        let defaults = ProxyLimits::default();
        let max_header_bytes = self
            .proxy
            .max_header_bytes
            .unwrap_or(defaults.max_header_bytes);
        if max_header_bytes < 64 {
            return Err(ConfigError::InvalidValue {
                field: "proxy.max_header_bytes".to_string(),
                message: "must be at least 64".to_string(),
            });
        }

        let t = &self.timeouts;
        let limits = ProxyLimits {
            max_header_bytes,
            header_timeout: secs_or(t.header_secs, defaults.header_timeout, "timeouts.header_secs")?,
            handshake_timeout: secs_or(
                t.handshake_secs,
                defaults.handshake_timeout,
                "timeouts.handshake_secs",
            )?,
            connect: ConnectPolicy {
                timeout: secs_or(t.connect_secs, defaults.connect.timeout, "timeouts.connect_secs")?,
                retries: t.connect_retries.unwrap_or(defaults.connect.retries),
                backoff: t
                    .retry_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.connect.backoff),
            },
            relay: RelayLimits {
                idle_timeout: secs_or(t.idle_secs, defaults.relay.idle_timeout, "timeouts.idle_secs")?,
                session_max: secs_or(
                    t.session_max_secs,
                    defaults.relay.session_max,
                    "timeouts.session_max_secs",
                )?,
            },
        };

        let audit_format = match self.audit.format.as_deref() {
            None | Some("text") => AuditFormat::Text,
            Some("json") => AuditFormat::Json,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: "audit.format".to_string(),
                    message: format!("expected 'text' or 'json', got '{}'", other),
                });
            }
        };

        let grace = fractional_secs(self.apps.grace_seconds.unwrap_or(2.0), "apps.grace_seconds")?;
        let interval = fractional_secs(
            self.apps.scan_interval_secs.unwrap_or(2.0),
            "apps.scan_interval_secs",
        )?;

        Ok(Settings {
            listen_host,
            http_port: self.proxy.http_port.unwrap_or(DEFAULT_HTTP_PORT),
            socks_port: self.proxy.socks_port.unwrap_or(DEFAULT_SOCKS_PORT),
            pac_port: self.proxy.pac_port.unwrap_or(DEFAULT_PAC_PORT),
            limits,
            audit_path: self
                .audit
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT_PATH)),
            audit_format,
            blocklist_path: self
                .rules
                .blocklist
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BLOCKLIST_PATH)),
            apps: AppSettings {
                enabled: self.apps.enabled.unwrap_or(true),
                mode: Mode::parse_lenient(self.apps.mode.as_deref().unwrap_or("polite")),
                grace,
                interval: interval.max(MIN_SCAN_INTERVAL),
                dry_run: self.apps.dry_run.unwrap_or(false),
            },
            enable_pac: self.system.enable_pac.unwrap_or(false),
        })
    }
}

/// Convert an optional seconds value, rejecting zero.
fn secs_or(value: Option<u64>, default: Duration, field: &str) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

/// Convert fractional seconds; negatives clamp to zero.
fn fractional_secs(value: f64, field: &str) -> Result<Duration, ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be a finite number".to_string(),
        });
    }
    Duration::try_from_secs_f64(value.max(0.0)).map_err(|e| ConfigError::InvalidValue {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// Overwrite `dst` when `src` is set.
fn take<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

impl ProxySection {
    fn merge(&mut self, other: ProxySection) {
        take(&mut self.listen_host, other.listen_host);
        take(&mut self.http_port, other.http_port);
        take(&mut self.socks_port, other.socks_port);
        take(&mut self.pac_port, other.pac_port);
        take(&mut self.max_header_bytes, other.max_header_bytes);
    }
}

impl TimeoutSection {
    fn merge(&mut self, other: TimeoutSection) {
        take(&mut self.header_secs, other.header_secs);
        take(&mut self.handshake_secs, other.handshake_secs);
        take(&mut self.connect_secs, other.connect_secs);
        take(&mut self.connect_retries, other.connect_retries);
        take(&mut self.retry_backoff_ms, other.retry_backoff_ms);
        take(&mut self.idle_secs, other.idle_secs);
        take(&mut self.session_max_secs, other.session_max_secs);
    }
}

impl AuditSection {
    fn merge(&mut self, other: AuditSection) {
        take(&mut self.path, other.path);
        take(&mut self.format, other.format);
    }
}

impl AppsSection {
    fn merge(&mut self, other: AppsSection) {
        take(&mut self.enabled, other.enabled);
        take(&mut self.mode, other.mode);
        take(&mut self.grace_seconds, other.grace_seconds);
        take(&mut self.scan_interval_secs, other.scan_interval_secs);
        take(&mut self.dry_run, other.dry_run);
    }
}

impl RulesSection {
    fn merge(&mut self, other: RulesSection) {
        take(&mut self.blocklist, other.blocklist);
    }
}

impl SystemSection {
    fn merge(&mut self, other: SystemSection) {
        take(&mut self.enable_pac, other.enable_pac);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_resolves() {
        let settings = Config::default().resolve().unwrap();

        assert_eq!(settings.listen_host.to_string(), "127.0.0.1");
        assert_eq!(settings.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(settings.socks_port, DEFAULT_SOCKS_PORT);
        assert_eq!(settings.pac_port, DEFAULT_PAC_PORT);
        assert_eq!(settings.audit_format, AuditFormat::Text);
        assert_eq!(settings.apps.mode, Mode::Polite);
        assert!(settings.apps.enabled);
        assert!(!settings.enable_pac);
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
            [proxy]
            http_port = 0
            socks_port = 1081

            [timeouts]
            header_secs = 5
            retry_backoff_ms = 100

            [apps]
            mode = "strict"
            grace_seconds = 1.5

            [audit]
            format = "json"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        let settings = config.resolve().unwrap();

        assert_eq!(settings.http_port, 0);
        assert_eq!(settings.socks_port, 1081);
        assert_eq!(settings.limits.header_timeout, Duration::from_secs(5));
        assert_eq!(settings.limits.connect.backoff, Duration::from_millis(100));
        assert_eq!(settings.apps.mode, Mode::Strict);
        assert_eq!(settings.apps.grace, Duration::from_millis(1500));
        assert_eq!(settings.audit_format, AuditFormat::Json);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<Config, _> = toml::from_str("[bogus]\nx = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_later_wins_and_unset_keeps() {
        let mut base: Config = toml::from_str("[proxy]\nhttp_port = 8080\nsocks_port = 9050\n").unwrap();
        let overlay: Config = toml::from_str("[proxy]\nhttp_port = 0\n").unwrap();

        base.merge(overlay);

        assert_eq!(base.proxy.http_port, Some(0));
        assert_eq!(base.proxy.socks_port, Some(9050));
    }

    #[test]
    fn test_invalid_listen_host() {
        let config: Config = toml::from_str("[proxy]\nlisten_host = \"localhost\"\n").unwrap();
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config: Config = toml::from_str("[timeouts]\nidle_secs = 0\n").unwrap();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        for toml in [
            "[apps]\ngrace_seconds = 1e30\n",
            "[apps]\nscan_interval_secs = 1e300\n",
            "[apps]\ngrace_seconds = nan\n",
            "[apps]\nscan_interval_secs = inf\n",
        ] {
            let config: Config = toml::from_str(toml).unwrap();
            assert!(matches!(
                config.resolve(),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
    }

    #[test]
    fn test_bad_audit_format_rejected() {
        let config: Config = toml::from_str("[audit]\nformat = \"xml\"\n").unwrap();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_app_values_are_clamped() {
        let config: Config = toml::from_str(
            "[apps]\nmode = \"aggressive\"\ngrace_seconds = -3.0\nscan_interval_secs = 0.1\n",
        )
        .unwrap();
        let settings = config.resolve().unwrap();

        assert_eq!(settings.apps.mode, Mode::Polite);
        assert_eq!(settings.apps.grace, Duration::ZERO);
        assert_eq!(settings.apps.interval, Duration::from_millis(500));
    }
}
