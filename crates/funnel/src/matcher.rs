//! Include/exclude matchers

use glob::{MatchOptions, Pattern};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Predicate over a POSIX relative path
pub type PathPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// One include or exclude rule
#[derive(Clone)]
pub enum Matcher {
    /// Glob; `*` does not cross `/`, `**` does
    Glob(Pattern),
    /// Regular expression searched anywhere in the path
    Regex(Regex),
    /// Arbitrary function
    Predicate(PathPredicate),
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl Matcher {
    pub fn glob(pattern: &str) -> Result<Self, glob::PatternError> {
        Ok(Matcher::Glob(Pattern::new(pattern)?))
    }

    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Matcher::Regex(Regex::new(pattern)?))
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Matcher::Predicate(Arc::new(f))
    }

    /// Test a relative file path
    pub fn matches(&self, relative_path: &str) -> bool {
        match self {
            Matcher::Glob(pattern) => pattern.matches_with(relative_path, GLOB_OPTIONS),
            Matcher::Regex(regex) => regex.is_match(relative_path),
            Matcher::Predicate(f) => f(relative_path),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Glob(p) => write!(f, "Glob({:?})", p.as_str()),
            Matcher::Regex(r) => write!(f, "Regex({:?})", r.as_str()),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Glob(p) => f.write_str(p.as_str()),
            Matcher::Regex(r) => write!(f, "/{}/", r.as_str()),
            Matcher::Predicate(_) => f.write_str("<predicate>"),
        }
    }
}
