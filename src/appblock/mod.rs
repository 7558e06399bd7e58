//! Application blocker.
//!
//! Periodically scans the process table and terminates processes whose name
//! or executable matches a configured pattern. Two termination policies:
//!
//! - **polite**: ask the process to exit, never force it.
//! - **strict**: ask, wait for the grace period, then force-kill once.
//!
//! Processes in [`NEVER_TOUCH`] and the daemon itself are never acted on.
//! Every action lands in the audit log as an `APP` entry.

mod blocker;
mod error;
mod process;
mod rules;

use std::fmt;
use std::time::Duration;

pub use blocker::{AppBlocker, AppBlockerConfig, ScanReport};
pub use error::{AppBlockError, ProcessError};
pub use process::{ProcessInfo, ProcessTable, SysinfoProcessTable};
pub use rules::{NEVER_TOUCH, Rule, compile_rules, first_match, glob_match, is_protected};

/// Shortest allowed delay between scans.
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(500);

/// Termination policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Terminate only.
    #[default]
    Polite,
    /// Terminate, then kill after the grace period.
    Strict,
}

impl Mode {
    /// Parse a mode name. Anything unrecognized is polite.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Mode::Strict,
            _ => Mode::Polite,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Polite => f.write_str("polite"),
            Mode::Strict => f.write_str("strict"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_lenient() {
        assert_eq!(Mode::parse_lenient("strict"), Mode::Strict);
        assert_eq!(Mode::parse_lenient(" STRICT "), Mode::Strict);
        assert_eq!(Mode::parse_lenient("polite"), Mode::Polite);
        assert_eq!(Mode::parse_lenient("nuclear"), Mode::Polite);
        assert_eq!(Mode::parse_lenient(""), Mode::Polite);
        assert_eq!(Mode::Strict.to_string(), "strict");
    }
}
