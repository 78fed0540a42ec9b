//! Search predicates shared by the cache, storage and places readers.
//!
//! A "key search" is the uniform filter input across the crate: an exact
//! string, a set of strings, a regular expression or an arbitrary predicate
//! function. `None` at the call sites means "match everything".

use std::collections::HashSet;
use std::fmt;

use regex::Regex;

/// A filter over string-valued fields (URLs, hosts, storage keys, header
/// values).
pub enum KeySearch {
    /// Exact string equality.
    Exact(String),
    /// Membership in a set of strings.
    AnyOf(HashSet<String>),
    /// Regular expression search (unanchored, like `Regex::is_match`).
    Pattern(Regex),
    /// Arbitrary predicate function.
    Predicate(Box<dyn Fn(&str) -> bool>),
}

impl KeySearch {
    /// Does `value` satisfy this search?
    pub fn hits(&self, value: &str) -> bool {
        match self {
            KeySearch::Exact(s) => value == s,
            KeySearch::AnyOf(set) => set.contains(value),
            KeySearch::Pattern(re) => re.is_match(value),
            KeySearch::Predicate(f) => f(value),
        }
    }

    /// Filter a sequence of candidate keys down to the hits.
    pub fn select<'a, I>(&self, candidates: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates.into_iter().filter(|c| self.hits(c)).collect()
    }
}

impl fmt::Debug for KeySearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySearch::Exact(s) => write!(f, "Exact({s:?})"),
            KeySearch::AnyOf(set) => write!(f, "AnyOf({} entries)", set.len()),
            KeySearch::Pattern(re) => write!(f, "Pattern({:?})", re.as_str()),
            KeySearch::Predicate(_) => write!(f, "Predicate(<fn>)"),
        }
    }
}

impl fmt::Display for KeySearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<&str> for KeySearch {
    fn from(value: &str) -> Self {
        KeySearch::Exact(value.to_string())
    }
}

impl From<String> for KeySearch {
    fn from(value: String) -> Self {
        KeySearch::Exact(value)
    }
}

impl From<Regex> for KeySearch {
    fn from(value: Regex) -> Self {
        KeySearch::Pattern(value)
    }
}

impl<const N: usize> From<[&str; N]> for KeySearch {
    fn from(value: [&str; N]) -> Self {
        KeySearch::AnyOf(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<String>> for KeySearch {
    fn from(value: Vec<String>) -> Self {
        KeySearch::AnyOf(value.into_iter().collect())
    }
}

/// Describe an optional search for `NotFound` error messages.
pub(crate) fn describe(search: Option<&KeySearch>) -> String {
    match search {
        Some(s) => s.to_string(),
        None => "<all>".to_string(),
    }
}

/// A filter over HTTP header fields on cache entries.
///
/// `Present(true)` keeps entries that carry the field at all, `Present(false)`
/// keeps entries without it, and `Value` requires the field to be present
/// with a matching value.
#[derive(Debug)]
pub enum HeaderSearch {
    Present(bool),
    Value(KeySearch),
}

impl HeaderSearch {
    pub fn hits(&self, value: Option<&str>) -> bool {
        match self {
            HeaderSearch::Present(wanted) => *wanted == value.is_some(),
            HeaderSearch::Value(search) => value.map(|v| search.hits(v)).unwrap_or(false),
        }
    }
}
