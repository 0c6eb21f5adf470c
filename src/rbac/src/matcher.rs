//! Pattern matching strategies for role names, domains and objects
//!
//! Role links may name a wildcard instead of a literal role or domain
//! (`g, alice, admin, org*`). The role graph never expands those links against
//! known names; it asks a [`Matcher`] at query time whether a pattern covers a
//! concrete candidate.
//!
//! Built-in strategies:
//!
//! - **Exact**: no patterns, plain equality
//! - **KeyMatch**: `*` matches the rest of the key (`/foo/*`, `org*`)
//! - **KeyMatch2**: `/*` matches any suffix, `:param` matches one path segment
//! - **Glob**: `*` matches any run, `?` matches one character, anywhere
//! - **Regex**: anchored regular expressions, compiled once per pattern

use crate::config::MatcherKind;
use crate::error::{RbacError, Result};
use dashmap::DashMap;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Decides whether a pattern covers a concrete value
pub trait Matcher: Send + Sync {
    /// Returns true if `candidate` is covered by `pattern`
    fn is_match(&self, pattern: &str, candidate: &str) -> bool;

    /// Returns true if `value` should be treated as a pattern rather than a literal
    fn is_pattern(&self, value: &str) -> bool;
}

/// Plain string equality
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl Matcher for ExactMatcher {
    fn is_match(&self, pattern: &str, candidate: &str) -> bool {
        pattern == candidate
    }

    fn is_pattern(&self, _value: &str) -> bool {
        false
    }
}

/// `*` matches everything after the prefix that precedes it
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyMatcher;

impl Matcher for KeyMatcher {
    fn is_match(&self, pattern: &str, candidate: &str) -> bool {
        key_match(candidate, pattern)
    }

    fn is_pattern(&self, value: &str) -> bool {
        value.contains('*')
    }
}

/// `/*` matches any suffix, `:name` matches exactly one path segment
#[derive(Debug, Clone, Default)]
pub struct KeyMatch2Matcher {
    compiled: RegexCache,
}

impl Matcher for KeyMatch2Matcher {
    fn is_match(&self, pattern: &str, candidate: &str) -> bool {
        if !self.is_pattern(pattern) {
            return pattern == candidate;
        }

        self.compiled
            .get_or_compile(pattern, key_match2_regex)
            .map(|re| re.is_match(candidate))
            .unwrap_or(false)
    }

    fn is_pattern(&self, value: &str) -> bool {
        value.contains('*') || value.contains("/:")
    }
}

/// Shell-style wildcards anywhere in the value
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobMatcher;

impl Matcher for GlobMatcher {
    fn is_match(&self, pattern: &str, candidate: &str) -> bool {
        glob_match(pattern, candidate)
    }

    fn is_pattern(&self, value: &str) -> bool {
        value.contains('*') || value.contains('?')
    }
}

/// Anchored regular expressions
#[derive(Debug, Clone, Default)]
pub struct RegexMatcher {
    compiled: RegexCache,
}

impl Matcher for RegexMatcher {
    fn is_match(&self, pattern: &str, candidate: &str) -> bool {
        self.compiled
            .get_or_compile(pattern, |p| format!("^(?:{})$", p))
            .map(|re| re.is_match(candidate))
            .unwrap_or(false)
    }

    fn is_pattern(&self, value: &str) -> bool {
        value.chars().any(|c| {
            matches!(
                c,
                '.' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' | '\\'
            )
        })
    }
}

/// Matching strategy installed on a role manager.
///
/// Built-in strategies dispatch statically through the enum; `Custom` carries
/// any user-supplied [`Matcher`].
#[derive(Clone)]
pub enum MatchStrategy {
    Exact(ExactMatcher),
    KeyMatch(KeyMatcher),
    KeyMatch2(KeyMatch2Matcher),
    Glob(GlobMatcher),
    Regex(RegexMatcher),
    Custom(Arc<dyn Matcher>),
}

impl MatchStrategy {
    /// Wrap a user-supplied matcher
    pub fn custom(matcher: impl Matcher + 'static) -> Self {
        MatchStrategy::Custom(Arc::new(matcher))
    }

    /// Returns true if this strategy never treats a value as a pattern
    pub fn is_exact(&self) -> bool {
        matches!(self, MatchStrategy::Exact(_))
    }

    /// Literal equality, or a pattern that covers the candidate
    pub fn covers(&self, pattern: &str, candidate: &str) -> bool {
        pattern == candidate || (self.is_pattern(pattern) && self.is_match(pattern, candidate))
    }

    /// Check that a pattern can be evaluated by this strategy.
    ///
    /// # Errors
    ///
    /// Returns [`RbacError::InvalidPattern`] if a regex-backed strategy can
    /// not compile `value`.
    pub fn validate(&self, value: &str) -> Result<()> {
        match self {
            MatchStrategy::KeyMatch2(_) if self.is_pattern(value) => {
                compile(&key_match2_regex(value))
            }
            MatchStrategy::Regex(_) if self.is_pattern(value) => {
                compile(&format!("^(?:{})$", value))
            }
            _ => Ok(()),
        }
    }
}

fn compile(source: &str) -> Result<()> {
    Regex::new(source)
        .map(|_| ())
        .map_err(|e| RbacError::InvalidPattern(format!("{}: {}", source, e)))
}

impl Default for MatchStrategy {
    fn default() -> Self {
        MatchStrategy::Exact(ExactMatcher)
    }
}

impl From<MatcherKind> for MatchStrategy {
    fn from(kind: MatcherKind) -> Self {
        match kind {
            MatcherKind::Exact => MatchStrategy::Exact(ExactMatcher),
            MatcherKind::KeyMatch => MatchStrategy::KeyMatch(KeyMatcher),
            MatcherKind::KeyMatch2 => MatchStrategy::KeyMatch2(KeyMatch2Matcher::default()),
            MatcherKind::Glob => MatchStrategy::Glob(GlobMatcher),
            MatcherKind::Regex => MatchStrategy::Regex(RegexMatcher::default()),
        }
    }
}

impl Matcher for MatchStrategy {
    fn is_match(&self, pattern: &str, candidate: &str) -> bool {
        match self {
            MatchStrategy::Exact(m) => m.is_match(pattern, candidate),
            MatchStrategy::KeyMatch(m) => m.is_match(pattern, candidate),
            MatchStrategy::KeyMatch2(m) => m.is_match(pattern, candidate),
            MatchStrategy::Glob(m) => m.is_match(pattern, candidate),
            MatchStrategy::Regex(m) => m.is_match(pattern, candidate),
            MatchStrategy::Custom(m) => m.is_match(pattern, candidate),
        }
    }

    fn is_pattern(&self, value: &str) -> bool {
        match self {
            MatchStrategy::Exact(m) => m.is_pattern(value),
            MatchStrategy::KeyMatch(m) => m.is_pattern(value),
            MatchStrategy::KeyMatch2(m) => m.is_pattern(value),
            MatchStrategy::Glob(m) => m.is_pattern(value),
            MatchStrategy::Regex(m) => m.is_pattern(value),
            MatchStrategy::Custom(m) => m.is_pattern(value),
        }
    }
}

impl fmt::Debug for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchStrategy::Exact(_) => "Exact",
            MatchStrategy::KeyMatch(_) => "KeyMatch",
            MatchStrategy::KeyMatch2(_) => "KeyMatch2",
            MatchStrategy::Glob(_) => "Glob",
            MatchStrategy::Regex(_) => "Regex",
            MatchStrategy::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

/// Compiled pattern cache shared by the regex-backed strategies.
///
/// Patterns that fail to compile are remembered as `None` so the warning is
/// logged once.
#[derive(Debug, Clone, Default)]
struct RegexCache {
    compiled: Arc<DashMap<String, Option<Regex>>>,
}

impl RegexCache {
    fn get_or_compile(&self, pattern: &str, translate: impl Fn(&str) -> String) -> Option<Regex> {
        if let Some(entry) = self.compiled.get(pattern) {
            return entry.value().clone();
        }

        let compiled = match Regex::new(&translate(pattern)) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("Pattern '{}' does not compile, treating as non-matching: {}", pattern, e);
                None
            }
        };

        self.compiled.insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

/// Returns true if `key1` is covered by `key2`, where a `*` in `key2` matches
/// everything after the prefix preceding it.
///
/// `key_match("/foo/bar", "/foo/*")` is true, `key_match("org2", "org*")` is true.
pub fn key_match(key1: &str, key2: &str) -> bool {
    match key2.find('*') {
        None => key1 == key2,
        Some(i) => key1.len() >= i && key1.as_bytes()[..i] == key2.as_bytes()[..i],
    }
}

/// Returns true if `key1` is covered by `key2` under KeyMatch2 rules
/// (`/*` any suffix, `:param` one segment).
///
/// `key_match2("/alice/data", "/:user/data")` is true.
pub fn key_match2(key1: &str, key2: &str) -> bool {
    match Regex::new(&key_match2_regex(key2)) {
        Ok(re) => re.is_match(key1),
        Err(_) => false,
    }
}

fn key_match2_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            ':' if out.ends_with('/') => {
                // Drop the parameter name, keep one segment
                while matches!(chars.peek(), Some(n) if *n != '/') {
                    chars.next();
                }
                out.push_str("[^/]+");
            }
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
        }
    }

    out.push('$');
    out
}

/// Shell-style wildcard match: `*` any run (possibly empty), `?` one character
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();

    let (mut pi, mut ci) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while ci < c.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == c[ci]) {
            pi += 1;
            ci += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            resume = ci;
            pi += 1;
        } else if let Some(s) = star {
            // Let the last star absorb one more character
            pi = s + 1;
            resume += 1;
            ci = resume;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&ch| ch == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_match() {
        assert!(key_match("/foo/bar", "/foo/*"));
        assert!(key_match("/foo", "/foo*"));
        assert!(key_match("org1", "org*"));
        assert!(!key_match("/bar/foo", "/foo/*"));
        assert!(!key_match("other", "org*"));
        assert!(key_match("exact", "exact"));
        assert!(!key_match("exact2", "exact"));
    }

    #[test]
    fn test_key_match2() {
        assert!(key_match2("/alice/data", "/:user/data"));
        assert!(!key_match2("/alice/bob/data", "/:user/data"));
        assert!(key_match2("/books/1/pages/2", "/books/*"));
        assert!(!key_match2("/magazines/1", "/books/*"));
        assert!(key_match2("/a.b", "/a.b"));
        assert!(!key_match2("/axb", "/a.b"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("org*", "org1"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*domain_*", "my_domain_1"));
        assert!(!glob_match("domain_*", "other"));
    }

    #[test]
    fn test_regex_matcher_is_anchored() {
        let matcher = RegexMatcher::default();
        assert!(matcher.is_match("org[0-9]+", "org42"));
        assert!(!matcher.is_match("org[0-9]+", "xorg42"));
        assert!(!matcher.is_match("org[0-9]+", "org42x"));
        assert!(matcher.is_pattern("org.*"));
        assert!(!matcher.is_pattern("org1"));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        let matcher = RegexMatcher::default();
        assert!(!matcher.is_match("org(", "org("));
        assert!(!matcher.is_match("org(", "org1"));
    }

    #[test]
    fn test_validate_pattern() {
        let regex = MatchStrategy::from(MatcherKind::Regex);
        assert!(regex.validate("org[0-9]+").is_ok());
        assert!(regex.validate("plain").is_ok());
        assert!(matches!(
            regex.validate("org("),
            Err(RbacError::InvalidPattern(_))
        ));

        let glob = MatchStrategy::from(MatcherKind::Glob);
        assert!(glob.validate("org(*").is_ok());
    }

    #[test]
    fn test_strategy_dispatch() {
        let exact = MatchStrategy::from(MatcherKind::Exact);
        assert!(!exact.is_pattern("org*"));
        assert!(exact.covers("org1", "org1"));
        assert!(!exact.covers("org*", "org1"));

        let key = MatchStrategy::from(MatcherKind::KeyMatch);
        assert!(key.is_pattern("org*"));
        assert!(key.covers("org*", "org1"));

        struct Suffix;
        impl Matcher for Suffix {
            fn is_match(&self, pattern: &str, candidate: &str) -> bool {
                candidate.ends_with(pattern.trim_start_matches('~'))
            }
            fn is_pattern(&self, value: &str) -> bool {
                value.starts_with('~')
            }
        }

        let custom = MatchStrategy::custom(Suffix);
        assert!(custom.covers("~_admin", "tenant_admin"));
        assert!(!custom.covers("~_admin", "tenant_user"));
        assert_eq!(format!("{:?}", custom), "Custom");
    }
}
