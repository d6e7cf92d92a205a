//! Scope sets
//!
//! A token grants access to a flat set of named scopes; a resource is
//! accessible when its name is a member of the set. Membership only:
//! no hierarchy and no wildcards.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Set of scope names attached to an access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set grants the named scope.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.0.insert(name.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Parse the wire form used by token records: scope names separated
    /// by whitespace. Empty segments are dropped.
    pub fn from_space_separated(raw: &str) -> Self {
        raw.split_whitespace().map(String::from).collect()
    }

    /// Render as the space-separated wire form, names in sorted order.
    pub fn to_space_separated(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(" ")
    }
}

impl FromIterator<String> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(String::from).collect())
    }
}
