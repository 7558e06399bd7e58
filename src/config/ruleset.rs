//! JSON ruleset loading.
//!
//! The ruleset names what to block. Domain and app lists may be grouped by a
//! label (the label is only for humans) or given as a flat list:
//!
//! ```json
//! {
//!   "blocked":   { "YouTube": ["*.youtube.com", "youtu.be"] },
//!   "unblocked": ["docs.google.com"],
//!   "ips":       ["203.0.113.0/24"],
//!   "apps":      ["discord*", "steam*"]
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use super::error::ConfigError;

/// A list of patterns, optionally grouped under labels.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PatternSet {
    /// `{ "label": ["pattern", ...], ... }`
    Grouped(BTreeMap<String, Vec<String>>),
    /// `["pattern", ...]`
    Flat(Vec<String>),
}

impl Default for PatternSet {
    fn default() -> Self {
        PatternSet::Flat(Vec::new())
    }
}

impl PatternSet {
    /// Flatten into a list of trimmed, non-empty patterns.
    ///
    /// Grouped sets are flattened in label order.
    pub fn patterns(&self) -> Vec<String> {
        let raw: Box<dyn Iterator<Item = &String>> = match self {
            PatternSet::Grouped(groups) => Box::new(groups.values().flatten()),
            PatternSet::Flat(list) => Box::new(list.iter()),
        };
        raw.map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// The blocking ruleset.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Ruleset {
    /// Blocked domain patterns (`example.com`, `*.example.com`).
    #[serde(default)]
    pub blocked: PatternSet,

    /// Domains exempt from blocking even if a blocked pattern matches.
    #[serde(default)]
    pub unblocked: PatternSet,

    /// Blocked IP addresses and CIDR networks.
    #[serde(default)]
    pub ips: Vec<String>,

    /// Application name patterns for the app blocker.
    #[serde(default)]
    pub apps: PatternSet,
}

impl Ruleset {
    /// Parse a ruleset from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Load the ruleset from a JSON file.
///
/// A missing file is an error: running without the expected rules would
/// silently allow everything.
pub fn load_ruleset(path: &Path) -> Result<Ruleset, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    Ruleset::from_json(&contents).map_err(|source| ConfigError::RulesetParse {
        path: path.to_path_buf(),
        source,
    })
}
