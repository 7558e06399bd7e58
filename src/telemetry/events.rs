//! Audit entry types.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::fmt::Write as _;

/// Which subsystem produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// HTTP `CONNECT` tunnel request.
    Connect,
    /// Absolute-URI HTTP request.
    Http,
    /// SOCKS5 `CONNECT` request.
    Socks5,
    /// Application blocker event.
    App,
}

impl EntryKind {
    /// The label written in the audit line.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Connect => "CONNECT",
            EntryKind::Http => "HTTP",
            EntryKind::Socks5 => "SOCKS5",
            EntryKind::App => "APP",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record.
///
/// For process events `host` holds the process display name and `port` holds
/// the pid (0 when the event is not tied to a process).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// When the decision was made.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Local>,
    /// Producing subsystem.
    pub kind: EntryKind,
    /// Destination host or process name.
    pub host: String,
    /// Destination port or pid.
    pub port: u32,
    /// Decision or action (`ALLOW`, `BLOCK`, `TERMINATE`, `KILL`, ...).
    pub decision: String,
    /// Rule annotation (matcher reason, `rule=<pattern>`, error detail).
    pub rule: String,
}

impl LogEntry {
    /// Create an entry stamped with the current local time.
    pub fn new(
        kind: EntryKind,
        host: impl Into<String>,
        port: u32,
        decision: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            host: host.into(),
            port,
            decision: decision.into(),
            rule: rule.into(),
        }
    }

    /// Render as a plain text line (without trailing newline).
    ///
    /// An empty rule is written as `-` so every line has the same number of
    /// fields. Whitespace, control characters and backslashes in the
    /// free-form fields are escaped as `\xNN` (or `\u{..}`), so one entry is
    /// always exactly one line of six fields.
    pub fn to_line(&self) -> String {
        let rule = if self.rule.is_empty() {
            Cow::Borrowed("-")
        } else {
            escape_field(&self.rule)
        };
        format!(
            "{} {} {}:{} {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind,
            escape_field(&self.host),
            self.port,
            escape_field(&self.decision),
            rule
        )
    }
}

/// Escape characters that would split or break a text audit line.
pub fn escape_field(value: &str) -> Cow<'_, str> {
    let needs_escape = |c: char| c.is_whitespace() || c.is_control() || c == '\\';
    if !value.chars().any(needs_escape) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if !needs_escape(c) {
            escaped.push(c);
        } else if (c as u32) <= 0xFF {
            let _ = write!(escaped, "\\x{:02x}", c as u32);
        } else {
            let _ = write!(escaped, "\\u{{{:x}}}", c as u32);
        }
    }
    Cow::Owned(escaped)
}
