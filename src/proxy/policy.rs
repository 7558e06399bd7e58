//! Destination policy evaluation engine.
//!
//! The engine decides whether a proxied destination is blocked. It is built
//! once from a [`Ruleset`] and never mutated, so it can be shared across
//! connection tasks behind an `Arc`.
//!
//! # Evaluation Order
//!
//! 1. Normalize the host (trim, lowercase, strip a trailing dot, strip IPv6
//!    brackets).
//! 2. IP literals are checked against the blocked networks only. Domain rules
//!    never apply to an IP literal.
//! 3. Domains on the exemption list are allowed.
//! 4. Exact blocked domains.
//! 5. Blocked suffixes, in load order.
//! 6. Anything else is allowed.
//!
//! # Pattern Compilation
//!
//! - `*.example.com` and `example.com` both block `example.com` itself and
//!   every subdomain of it. `notexample.com` is not affected.
//! - Domain-list entries that parse as an IP address or CIDR are treated as
//!   network rules.
//!
//! # Example
//!
//! ```ignore
//! use focus_guard::config::Ruleset;
//! use focus_guard::proxy::PolicyEngine;
//!
//! let ruleset = Ruleset::from_json(r#"{"blocked": ["*.youtube.com"]}"#)?;
//! let engine = PolicyEngine::from_ruleset(&ruleset)?;
//!
//! assert!(engine.decide("www.youtube.com").blocked);
//! ```

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;

use crate::config::{ConfigError, Ruleset};

/// Reason string for destinations no rule matched.
pub const REASON_NONE: &str = "none";

/// Result of policy evaluation for a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the connection must be refused.
    pub blocked: bool,
    /// Which rule produced the decision (`none`, `exact:<host>`,
    /// `suffix:<.suffix>`, `ip:<network>`, `exempt:<rule>`).
    pub reason: String,
}

impl Decision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            blocked: false,
            reason: reason.into(),
        }
    }

    fn block(reason: impl Into<String>) -> Self {
        Self {
            blocked: true,
            reason: reason.into(),
        }
    }

    /// Audit label for this decision.
    pub fn label(&self) -> &'static str {
        if self.blocked { "BLOCK" } else { "ALLOW" }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label(), self.reason)
    }
}

/// Compiled domain patterns: an exact set plus ordered suffixes.
#[derive(Debug, Default)]
struct DomainIndex {
    exact: HashSet<String>,
    /// Suffixes with their leading dot, e.g. `.example.com`.
    suffixes: Vec<String>,
}

impl DomainIndex {
    fn insert(&mut self, domain: &str) {
        if self.exact.insert(domain.to_string()) {
            self.suffixes.push(format!(".{}", domain));
        }
    }

    /// First matching rule, formatted as `exact:<host>` or `suffix:<sfx>`.
    fn find(&self, host: &str) -> Option<String> {
        if self.exact.contains(host) {
            return Some(format!("exact:{}", host));
        }
        self.suffixes
            .iter()
            .find(|suffix| host.ends_with(suffix.as_str()))
            .map(|suffix| format!("suffix:{}", suffix))
    }

    fn len(&self) -> usize {
        self.exact.len()
    }
}

/// Policy engine for destination evaluation.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    /// Blocked domains.
    blocked: DomainIndex,
    /// Domains exempt from blocking.
    exempt: DomainIndex,
    /// Blocked networks, in load order.
    networks: Vec<IpNet>,
}

impl PolicyEngine {
    /// Build an engine from a ruleset.
    ///
    /// Fails on an IP-list entry that is neither an address nor a CIDR.
    pub fn from_ruleset(ruleset: &Ruleset) -> Result<Self, ConfigError> {
        let mut engine = Self::default();

        for entry in &ruleset.ips {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let net = parse_network(entry).ok_or_else(|| ConfigError::InvalidRule {
                rule: entry.to_string(),
                message: "not an IP address or CIDR network".to_string(),
            })?;
            engine.push_network(net);
        }

        for pattern in ruleset.blocked.patterns() {
            match parse_network(&pattern) {
                Some(net) => engine.push_network(net),
                None => {
                    if let Some(domain) = domain_of(&pattern) {
                        engine.blocked.insert(&domain);
                    }
                }
            }
        }

        for pattern in ruleset.unblocked.patterns() {
            if let Some(domain) = domain_of(&pattern) {
                engine.exempt.insert(&domain);
            }
        }

        Ok(engine)
    }

    /// Evaluate policy for a destination host (domain or IP literal).
    pub fn decide(&self, host: &str) -> Decision {
        let host = normalize_host(host);

        if let Ok(ip) = host.parse::<IpAddr>() {
            return match self.networks.iter().find(|net| net.contains(&ip)) {
                Some(net) => Decision::block(format!("ip:{}", net)),
                None => Decision::allow(REASON_NONE),
            };
        }

        if host.is_empty() {
            return Decision::allow(REASON_NONE);
        }

        if let Some(rule) = self.exempt.find(&host) {
            return Decision::allow(format!("exempt:{}", rule));
        }

        match self.blocked.find(&host) {
            Some(rule) => Decision::block(rule),
            None => Decision::allow(REASON_NONE),
        }
    }

    /// Number of distinct blocked domains.
    pub fn blocked_domain_count(&self) -> usize {
        self.blocked.len()
    }

    /// Number of blocked networks.
    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    fn push_network(&mut self, net: IpNet) {
        let net = net.trunc();
        if !self.networks.contains(&net) {
            self.networks.push(net);
        }
    }
}

/// Normalize a host for matching.
pub fn normalize_host(host: &str) -> String {
    let mut host = host.trim().to_lowercase();
    if host.ends_with('.') {
        host.pop();
    }
    if host.starts_with('[') && host.ends_with(']') && host.len() >= 2 {
        host = host[1..host.len() - 1].to_string();
    }
    host
}

/// Whether a client-supplied host is usable as a destination.
///
/// Rejects empty names and any whitespace or control character.
pub fn is_valid_host(host: &str) -> bool {
    !host.is_empty() && !host.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Parse `a.b.c.d`, `a.b.c.d/nn`, or the IPv6 equivalents.
fn parse_network(entry: &str) -> Option<IpNet> {
    let entry = entry.trim();
    if let Ok(net) = entry.parse::<IpNet>() {
        return Some(net);
    }
    let bare = entry.trim_start_matches('[').trim_end_matches(']');
    let ip = bare.parse::<IpAddr>().ok()?;
    let prefix = if ip.is_ipv4() { 32 } else { 128 };
    IpNet::new(ip, prefix).ok()
}

/// Strip an optional `*.` prefix and normalize. Returns None for blanks.
fn domain_of(pattern: &str) -> Option<String> {
    let lower = normalize_host(pattern);
    let domain = lower.strip_prefix("*.").unwrap_or(&lower);
    let domain = domain.trim_start_matches('.');
    if domain.is_empty() || domain == "*" {
        None
    } else {
        Some(domain.to_string())
    }
}
