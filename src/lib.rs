//! focus-guard: local admission-control daemon
//!
//! Blocks distracting websites and applications on a single machine. Browsers
//! are pointed at a local HTTP/SOCKS5 proxy pair through a PAC script; the
//! proxies refuse connections to blocked domains and IP ranges and relay
//! everything else. A separate loop terminates blocked desktop applications.
//!
//! # Architecture
//!
//! - **Proxy**: HTTP (`CONNECT` + absolute-URI) and SOCKS5 servers sharing one
//!   policy engine
//! - **PAC**: serves the auto-config script that routes browsers to the proxies
//! - **App blocker**: periodic process scan with polite or strict termination
//! - **Config**: layered TOML settings plus a JSON ruleset
//! - **Telemetry**: append-only audit trail of every decision
//! - **Sysproxy**: optional per-user PAC pointer, restored on shutdown

#![warn(clippy::all)]

pub mod appblock;
pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod pac;
pub mod proxy;
pub mod sysproxy;
pub mod telemetry;
