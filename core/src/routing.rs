//! Routing keys and topic-exchange pattern matching.
//!
//! Events are addressed by a dot-segmented [`RoutingKey`] such as
//! `invoice.payment.created`. The broker fans each message out to every queue
//! whose binding pattern matches the key:
//!
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments
//!
//! Publishers never see bindings. The matcher lives here so consumers and test
//! doubles apply the same semantics the broker does.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reasons a routing key is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingKeyError {
    /// The key was empty.
    #[error("Routing key is empty")]
    Empty,

    /// A segment between dots was empty (`a..b`, `.a`, `a.`).
    #[error("Routing key '{0}' contains an empty segment")]
    EmptySegment(String),

    /// Wildcards and whitespace belong to binding patterns, not keys.
    #[error("Routing key '{0}' contains a reserved character")]
    ReservedCharacter(String),
}

/// Immutable, validated event routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Validate and wrap a routing key.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingKeyError`] if the key is empty, has an empty segment,
    /// or contains `*`, `#` or whitespace.
    pub fn new(key: impl Into<String>) -> Result<Self, RoutingKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(RoutingKeyError::Empty);
        }
        if key.chars().any(|c| c == '*' || c == '#' || c.is_whitespace()) {
            return Err(RoutingKeyError::ReservedCharacter(key));
        }
        if key.split('.').any(str::is_empty) {
            return Err(RoutingKeyError::EmptySegment(key));
        }
        Ok(Self(key))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the dot-separated segments.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Whether a binding `pattern` would route this key.
    #[must_use]
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        let key: Vec<&str> = self.segments().collect();
        let pattern: Vec<&str> = pattern.split('.').collect();
        match_segments(&pattern, &key)
    }
}

fn match_segments(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` absorbs zero segments, or one and stays in place
            match_segments(rest, key) || (!key.is_empty() && match_segments(pattern, &key[1..]))
        },
        Some((&"*", rest)) => !key.is_empty() && match_segments(rest, &key[1..]),
        Some((literal, rest)) => {
            key.first() == Some(literal) && match_segments(rest, &key[1..])
        },
    }
}

impl TryFrom<String> for RoutingKey {
    type Error = RoutingKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for RoutingKey {
    type Error = RoutingKeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RoutingKey> for String {
    fn from(key: RoutingKey) -> Self {
        key.0
    }
}

impl AsRef<str> for RoutingKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn key(s: &str) -> RoutingKey {
        RoutingKey::new(s).unwrap()
    }

    #[test]
    fn rejects_malformed_keys() {
        assert_eq!(RoutingKey::new(""), Err(RoutingKeyError::Empty));
        assert!(matches!(RoutingKey::new("a..b"), Err(RoutingKeyError::EmptySegment(_))));
        assert!(matches!(RoutingKey::new(".a"), Err(RoutingKeyError::EmptySegment(_))));
        assert!(matches!(RoutingKey::new("a.*"), Err(RoutingKeyError::ReservedCharacter(_))));
        assert!(matches!(RoutingKey::new("a b"), Err(RoutingKeyError::ReservedCharacter(_))));
    }

    #[test]
    fn exact_pattern() {
        assert!(key("x.y.created").matches_pattern("x.y.created"));
        assert!(!key("x.y.created").matches_pattern("x.y.deleted"));
    }

    #[test]
    fn star_matches_one_segment() {
        assert!(key("x.y.created").matches_pattern("x.*.created"));
        assert!(key("x.y.created").matches_pattern("*.*.*"));
        assert!(!key("x.y.created").matches_pattern("x.*"));
        assert!(!key("x.created").matches_pattern("x.*.created"));
    }

    #[test]
    fn hash_matches_zero_or_more() {
        assert!(key("x.y.created").matches_pattern("#"));
        assert!(key("x.y.created").matches_pattern("x.#"));
        assert!(key("x.y.created").matches_pattern("#.created"));
        assert!(key("x.created").matches_pattern("x.#.created"));
        assert!(key("x.a.b.created").matches_pattern("x.#.created"));
        assert!(!key("y.created").matches_pattern("x.#"));
    }

    #[test]
    fn deserialization_validates() {
        let parsed: Result<RoutingKey, _> = serde_json::from_str("\"a..b\"");
        assert!(parsed.is_err());

        let parsed: RoutingKey = serde_json::from_str("\"a.b\"").unwrap();
        assert_eq!(parsed.as_str(), "a.b");
    }

    proptest! {
        #[test]
        fn every_key_matches_itself_and_hash(segments in prop::collection::vec("[a-z]{1,6}", 1..5)) {
            let routing_key = key(&segments.join("."));
            prop_assert!(routing_key.matches_pattern(routing_key.as_str()));
            prop_assert!(routing_key.matches_pattern("#"));
        }
    }
}
