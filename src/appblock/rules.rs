//! Process-name rules.
//!
//! Rules are shell-style globs (`*`, `?`, `[...]`) compared case-insensitively
//! against a process name and the basename of its executable.

use std::path::Path;

/// Process names that are never acted on, whatever the rules say.
pub const NEVER_TOUCH: &[&str] = &[
    "system",
    "idle",
    "init",
    "launchd",
    "systemd",
    "wininit.exe",
    "services.exe",
    "csrss.exe",
    "lsass.exe",
    "smss.exe",
    "kernel_task",
    "explorer.exe",
    "winlogon.exe",
];

/// A single app rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Pattern as written in the ruleset.
    pub pattern: String,
    /// Lowercased pattern used for matching.
    pub lower: String,
}

impl Rule {
    /// Create a rule. Returns None for a blank pattern.
    pub fn new(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return None;
        }
        Some(Self {
            pattern: pattern.to_string(),
            lower: pattern.to_lowercase(),
        })
    }

    /// Match against an already lowercased name.
    pub fn matches(&self, lower_name: &str) -> bool {
        glob_match(&self.lower, lower_name)
    }
}

/// Build rules from raw patterns, dropping blanks.
pub fn compile_rules<I, S>(patterns: I) -> Vec<Rule>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .filter_map(|p| Rule::new(p.as_ref()))
        .collect()
}

/// Whether a process is protected by [`NEVER_TOUCH`].
pub fn is_protected(name: &str, exe: Option<&Path>) -> bool {
    let name = name.to_lowercase();
    if NEVER_TOUCH.contains(&name.as_str()) {
        return true;
    }
    exe_basename(exe)
        .map(|base| NEVER_TOUCH.contains(&base.as_str()))
        .unwrap_or(false)
}

/// First rule matching either the name or the exe basename.
pub fn first_match<'a>(rules: &'a [Rule], name: &str, exe: Option<&Path>) -> Option<&'a Rule> {
    let name = name.to_lowercase();
    let base = exe_basename(exe);

    rules.iter().find(|rule| {
        rule.matches(&name) || base.as_deref().is_some_and(|base| rule.matches(base))
    })
}

/// Lowercased file name of an executable path.
pub fn exe_basename(exe: Option<&Path>) -> Option<String> {
    exe.and_then(Path::file_name)
        .map(|base| base.to_string_lossy().to_lowercase())
        .filter(|base| !base.is_empty())
}

/// Shell-style glob match over characters.
///
/// Supports `*` (any run), `?` (any one char) and bracket classes with
/// ranges and `!`/`^` negation. An unterminated `[` matches itself.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position after the last `*` and the text index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p + 1, t));
                p += 1;
                continue;
            }
            Some('?') => Some(p + 1),
            Some('[') => match match_class(&pattern, p, text[t]) {
                Some((true, next)) => Some(next),
                Some((false, _)) => None,
                None if text[t] == '[' => Some(p + 1),
                None => None,
            },
            Some(&c) if c == text[t] => Some(p + 1),
            _ => None,
        };

        match step {
            Some(next) => {
                p = next;
                t += 1;
            }
            None => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Match `c` against the class starting at `pattern[start] == '['`.
///
/// Returns `(matched, index after ']')`, or None if the class is unterminated.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    loop {
        let &lo = pattern.get(i)?;
        if lo == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;

        if pattern.get(i + 1) == Some(&'-') && pattern.get(i + 2).is_some_and(|&hi| hi != ']') {
            let hi = pattern[i + 2];
            if lo <= c && c <= hi {
                matched = true;
            }
            i += 3;
        } else {
            if lo == c {
                matched = true;
            }
            i += 1;
        }
    }
}
