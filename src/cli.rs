//! Command-line interface definitions for focus-guard.
//!
//! Uses clap's derive API for type-safe argument parsing. Every flag that has
//! a config-file equivalent overrides it; omitted flags leave the file value
//! alone.

use clap::Parser;
use std::path::PathBuf;

/// Local focus blocker.
///
/// focus-guard runs an HTTP proxy, a SOCKS5 proxy and a PAC responder on
/// localhost, refusing connections to blocked domains and IP ranges. It can
/// also terminate distracting desktop applications.
#[derive(Parser, Debug)]
#[command(name = "focus-guard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to additional config file.
    ///
    /// Merged on top of the user config, giving it the highest priority
    /// except for CLI flags. The file must exist.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Ruleset JSON with blocked domains, exemptions, IP ranges and apps.
    #[arg(short = 'b', long = "blocklist", value_name = "PATH")]
    pub blocklist: Option<PathBuf>,

    /// HTTP proxy port (0 picks a free port).
    #[arg(long = "proxy-port", value_name = "PORT")]
    pub proxy_port: Option<u16>,

    /// SOCKS5 proxy port (0 picks a free port).
    #[arg(long = "socks-port", value_name = "PORT")]
    pub socks_port: Option<u16>,

    /// PAC responder port (0 picks a free port).
    #[arg(long = "pac-port", value_name = "PORT")]
    pub pac_port: Option<u16>,

    /// Audit log file.
    #[arg(long = "log", value_name = "PATH")]
    pub log: Option<PathBuf>,

    /// Point the per-user system proxy at the PAC responder while running.
    #[arg(long = "enable-pac", conflicts_with = "disable_pac")]
    pub enable_pac: bool,

    /// Remove the per-user PAC pointer and exit.
    #[arg(long = "disable-pac")]
    pub disable_pac: bool,

    /// App termination mode: polite or strict.
    #[arg(long = "app-mode", value_name = "MODE")]
    pub app_mode: Option<String>,

    /// Log matching apps without terminating them.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Disable the app blocker.
    #[arg(long = "no-apps")]
    pub no_apps: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_basic() {
        let cli = Cli::parse_from(["focus-guard"]);
        assert!(cli.config.is_none());
        assert!(cli.proxy_port.is_none());
        assert!(!cli.enable_pac);
        assert!(!cli.no_apps);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_cli_parse_with_options() {
        let cli = Cli::parse_from([
            "focus-guard",
            "--blocklist",
            "rules.json",
            "--proxy-port",
            "8888",
            "--socks-port",
            "0",
            "--app-mode",
            "strict",
            "--dry-run",
            "--enable-pac",
            "-vv",
        ]);

        assert_eq!(cli.blocklist, Some(PathBuf::from("rules.json")));
        assert_eq!(cli.proxy_port, Some(8888));
        assert_eq!(cli.socks_port, Some(0));
        assert_eq!(cli.app_mode.as_deref(), Some("strict"));
        assert!(cli.dry_run);
        assert!(cli.enable_pac);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_enable_and_disable_pac_conflict() {
        let result = Cli::try_parse_from(["focus-guard", "--enable-pac", "--disable-pac"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Cli::try_parse_from(["focus-guard", "--proxy-port", "70000"]).is_err());
    }
}
