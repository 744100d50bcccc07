//! Types exchanged with the graph store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{EntityId, FieldPath, compute};
use crate::query::CompiledFilter;

/// Direction of a hierarchy traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Traversal {
    /// The root node itself.
    Node,
    Children,
    #[default]
    Descendants,
    Parents,
    Ancestors,
}

impl Traversal {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Children => "children",
            Self::Descendants => "descendants",
            Self::Parents => "parents",
            Self::Ancestors => "ancestors",
        }
    }
}

impl fmt::Display for Traversal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    pub field: FieldPath,
    #[serde(default)]
    pub order: SortOrder,
}

/// A traversal query: ids reachable from `root`, in breadth-first order,
/// matching `filter`, then sorted and paginated.
#[derive(Debug, Clone, PartialEq)]
pub struct FindRequest {
    pub root: EntityId,
    pub traversal: Traversal,
    pub filter: Option<CompiledFilter>,
    pub sort: Option<Sort>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl FindRequest {
    pub fn new(root: EntityId, traversal: Traversal) -> Self {
        Self {
            root,
            traversal,
            filter: None,
            sort: None,
            offset: 0,
            limit: None,
        }
    }
}

/// Type registry of an origin: type name → two-character id prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub types: BTreeMap<String, String>,
}

impl Schema {
    pub fn prefix_of(&self, type_name: &str) -> Option<&str> {
        self.types.get(type_name).map(String::as_str)
    }
}

/// Deterministic marker identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(pub u64);

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Registration asking the store to emit change events for a read pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub kind: Traversal,
    pub root: EntityId,
    /// Sorted, deduplicated.
    pub fields: Vec<FieldPath>,
    pub filter: Option<CompiledFilter>,
}

impl Marker {
    pub fn new(
        kind: Traversal,
        root: EntityId,
        fields: impl IntoIterator<Item = FieldPath>,
        filter: Option<CompiledFilter>,
    ) -> Self {
        let mut fields: Vec<FieldPath> = fields.into_iter().collect();
        fields.sort();
        fields.dedup();
        Self {
            kind,
            root,
            fields,
            filter,
        }
    }

    /// Hash of (kind, root, fields, compiled filter).
    pub fn id(&self) -> MarkerId {
        let mut key = String::with_capacity(64);
        key.push_str(self.kind.as_str());
        key.push('\n');
        key.push_str(self.root.as_str());
        key.push('\n');
        for field in &self.fields {
            key.push_str(field.as_str());
            key.push('\n');
        }
        if let Some(filter) = &self.filter {
            key.push_str(&filter.to_string());
        }
        MarkerId(compute(&key))
    }
}

/// Change notification from an origin.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreEvent {
    Update { id: EntityId, field: FieldPath },
    Delete { id: EntityId, fields: Vec<FieldPath> },
    SchemaUpdate,
    Heartbeat,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("origin `{0}` unavailable")]
    Unavailable(String),

    #[error("entity `{0}` not found")]
    NotFound(EntityId),

    #[error("store request failed: {0}")]
    Request(String),
}
