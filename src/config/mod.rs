//! Configuration system for focus-guard.
//!
//! Two inputs drive the daemon:
//!
//! - the runtime config (TOML), loaded with hierarchy merging by
//!   [`ConfigLoader`] and resolved into [`Settings`];
//! - the ruleset (JSON), loaded by [`load_ruleset`], which names the
//!   domains, networks and applications to block.
//!
//! # Configuration Hierarchy
//!
//! 1. Built-in defaults
//! 2. User config: `~/.config/focus-guard/config.toml`
//! 3. Additional config file (via `--config` flag)
//! 4. CLI flags (highest priority)
//!
//! ```toml
//! [proxy]
//! http_port = 3128
//! socks_port = 1080
//!
//! [apps]
//! mode = "strict"
//! grace_seconds = 2.0
//! ```

mod error;
mod loader;
mod ruleset;
mod schema;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use ruleset::{PatternSet, Ruleset, load_ruleset};
pub use schema::{
    AppSettings, AppsSection, AuditSection, Config, ProxySection, RulesSection, Settings,
    SystemSection, TimeoutSection,
};
