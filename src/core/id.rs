//! Identifier newtypes shared across the engine.
//!
//! - [`EntityId`]: node id in the graph store; its first two characters are
//!   the type prefix
//! - [`FieldPath`]: dot-separated path into a node's fields
//! - [`Origin`]: name of the authoritative database a query targets
//! - [`Channel`]: stable subscription identity (hash of the query definition)

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use super::hash::ContentHash;

/// Length of the type prefix at the start of every entity id.
pub const TYPE_PREFIX_LEN: usize = 2;

/// Node id in the graph store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Arc<str>);

impl EntityId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Type prefix of the id (first two characters, or the whole id if shorter).
    pub fn type_prefix(&self) -> &str {
        type_prefix(&self.0)
    }
}

/// Type prefix of a raw id string.
pub fn type_prefix(id: &str) -> &str {
    match id.char_indices().nth(TYPE_PREFIX_LEN) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dot-separated field path (`a.b.c`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Arc<str>);

impl FieldPath {
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(Arc::from(path.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    /// Every dot-prefix of the path, shortest first: `a.b.c` yields
    /// `a`, `a.b`, `a.b.c`.
    pub fn prefixes(&self) -> SmallVec<[&str; 4]> {
        let path = self.as_str();
        let mut out: SmallVec<[&str; 4]> = path
            .match_indices('.')
            .map(|(pos, _)| &path[..pos])
            .filter(|p| !p.is_empty())
            .collect();
        if !path.is_empty() {
            out.push(path);
        }
        out
    }

    /// First segment (`a` for `a.b.c`).
    pub fn head(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Append a segment.
    pub fn join(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self::new(segment)
        } else {
            Self(Arc::from(format!("{}.{segment}", self.0)))
        }
    }
}

impl Borrow<str> for FieldPath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for FieldPath {
    fn from(path: String) -> Self {
        Self(Arc::from(path))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of an origin database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Origin(Arc<str>);

impl Origin {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl From<&str> for Origin {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connected client holding subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Arc<str>);

impl ClientId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Subscription identity: structural hash of the subscription definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(ContentHash);

impl Channel {
    /// Channel for a definition given as JSON.
    pub fn of_value(definition: &Value) -> Self {
        Self(ContentHash::of_value(definition))
    }

    /// Channel of the schema subscription of an origin.
    pub fn schema(origin: &Origin) -> Self {
        Self::of_value(&serde_json::json!({ "$schema": origin.as_str() }))
    }

    #[inline]
    pub fn hash(&self) -> &ContentHash {
        &self.0
    }

    pub fn to_hex(self) -> String {
        self.0.to_hex()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
