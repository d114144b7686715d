// pattern.rs — Wildcard string patterns.
//
// Shared by ignore-field filtering and the policy matcher. A rule is one of:
//
//   ""  or "*"      → matches anything
//   "spec.*.image"  → glob; `*` expands to `.*`, everything else is literal
//   "metadata.name" → exact string equality
//
// Globs are anchored at both ends: `containers.*` does not match the nested
// key `spec.template.spec.containers.0.image`, while `*.image` and
// `spec.*` do, since `*` spans dots. A rule that cannot be compiled falls back
// to exact equality, so a bad pattern never widens what it matches.

use regex::Regex;

/// A compiled match rule.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Empty string or a lone `*`.
    Any,
    /// Literal equality.
    Exact(String),
    /// `*`-glob translated to an anchored regex.
    Glob { raw: String, regex: Regex },
}

impl Pattern {
    pub fn new(rule: &str) -> Self {
        if rule.is_empty() || rule == "*" {
            return Pattern::Any;
        }
        if !rule.contains('*') {
            return Pattern::Exact(rule.to_string());
        }
        let body = rule
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        match Regex::new(&format!("^{}$", body)) {
            Ok(regex) => Pattern::Glob {
                raw: rule.to_string(),
                regex,
            },
            Err(_) => Pattern::Exact(rule.to_string()),
        }
    }

    pub fn matches(&self, data: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Exact(rule) => rule == data,
            Pattern::Glob { raw, regex } => raw == data || regex.is_match(data),
        }
    }

    /// The rule text this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Any => "*",
            Pattern::Exact(rule) => rule,
            Pattern::Glob { raw, .. } => raw,
        }
    }
}

/// Check a single value against a single rule.
pub fn is_listed(data: &str, rule: &str) -> bool {
    Pattern::new(rule).matches(data)
}

/// Return the first rule in `rules` that matches `data`, if any.
///
/// An empty rule list matches nothing.
pub fn first_match<'a, S: AsRef<str>>(data: &str, rules: &'a [S]) -> Option<&'a str> {
    rules
        .iter()
        .map(AsRef::as_ref)
        .find(|rule| is_listed(data, rule))
}
