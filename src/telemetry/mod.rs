//! Audit logging for focus-guard.
//!
//! Every admission decision (proxy allow/block, process terminate/kill) is
//! appended to an audit file. This is a separate concern from diagnostic
//! logging:
//!
//! - **Audit logging** (this module): one line per decision, written to a file
//!   by a dedicated writer thread so the network path never waits on disk I/O
//! - **Debug logging** (`tracing`): development logs on stderr
//!
//! # Usage
//!
//! ```ignore
//! use focus_guard::telemetry::{AuditLogger, AuditFormat, EntryKind};
//!
//! let audit = AuditLogger::open("logs/traffic.log", AuditFormat::Text)?;
//! audit.record(EntryKind::Connect, "example.com", 443, "BLOCK", "suffix:.example.com");
//! audit.shutdown().await;
//! ```
//!
//! # Line Format
//!
//! ```text
//! 2026-01-07 14:32:01 CONNECT example.com:443 BLOCK suffix:.example.com
//! ```

mod audit;
mod error;
mod events;

pub use audit::{AuditCapture, AuditFormat, AuditLogger};
pub use error::TelemetryError;
pub use events::{EntryKind, LogEntry};
