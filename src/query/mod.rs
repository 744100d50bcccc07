//! Query definitions and execution.
//!
//! A [`Query`] is a root entity plus a list of [`Operation`]s, each writing
//! one key of the result object. Executing it against a
//! [`GraphStore`](crate::store::GraphStore) yields the payload, the
//! [`DependencyTree`] it was built from and the markers to register.

mod deps;
mod exec;
mod filter;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{Channel, EntityId, FieldPath, Origin};
use crate::store::{Sort, StoreError, Traversal};

pub use deps::{ContainsDep, DependencyTree, PARENTS_FIELD};
pub use exec::{Execution, execute};
pub use filter::{CompiledFilter, Filter, Instr, TYPE_FIELD};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode query: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A live query rooted at one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub origin: Origin,
    pub id: EntityId,
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl Query {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            origin: Origin::default(),
            id: id.into(),
            operations: Vec::new(),
        }
    }

    pub fn on(mut self, origin: impl AsRef<str>) -> Self {
        self.origin = Origin::new(origin);
        self
    }

    pub fn with(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// Stable identity of this query.
    pub fn channel(&self) -> Result<Channel, QueryError> {
        let definition = serde_json::to_value(self)?;
        Ok(Channel::of_value(&definition))
    }
}

/// Operations applied to one entity on the given id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubQuery {
    /// Entity to read; defaults to the enclosing entity.
    #[serde(default)]
    pub id: Option<EntityId>,
    pub operations: Vec<Operation>,
}

/// One key of a result object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Constant value.
    Value { field: String, value: Value },

    /// First non-null field among `source` (defaults to `field` itself).
    Field {
        field: String,
        #[serde(default)]
        source: Vec<FieldPath>,
        #[serde(default)]
        default: Option<Value>,
    },

    /// Entities reachable from `root` (defaults to the current entity).
    Find {
        field: String,
        #[serde(default)]
        root: Option<EntityId>,
        #[serde(default)]
        traverse: Traversal,
        #[serde(default)]
        filter: Option<Filter>,
        #[serde(default)]
        sort: Option<Sort>,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        limit: Option<usize>,
        /// Return the first match (or null) instead of a list.
        #[serde(default)]
        single: bool,
        #[serde(default)]
        operations: Vec<Operation>,
    },

    /// First non-null `source` field on the entity or its ancestors,
    /// optionally restricted to ancestors of the given types.
    Inherit {
        field: String,
        source: Vec<FieldPath>,
        #[serde(default)]
        types: Vec<String>,
    },

    /// Object built from sub-operations on `id` (defaults to the current
    /// entity).
    Nested {
        field: String,
        #[serde(default)]
        id: Option<EntityId>,
        operations: Vec<Operation>,
    },

    /// Array of objects, one per sub-query.
    Array { field: String, items: Vec<SubQuery> },
}

impl Operation {
    /// Result key written by this operation.
    pub fn field(&self) -> &str {
        match self {
            Self::Value { field, .. }
            | Self::Field { field, .. }
            | Self::Find { field, .. }
            | Self::Inherit { field, .. }
            | Self::Nested { field, .. }
            | Self::Array { field, .. } => field,
        }
    }

    /// Shorthand for reading a field under its own name.
    pub fn field_of(field: &str) -> Self {
        Self::Field {
            field: field.to_string(),
            source: Vec::new(),
            default: None,
        }
    }

    /// Shorthand for a list find with default options.
    pub fn find(field: &str, traverse: Traversal, filter: Option<Filter>, operations: Vec<Operation>) -> Self {
        Self::Find {
            field: field.to_string(),
            root: None,
            traverse,
            filter,
            sort: None,
            offset: 0,
            limit: None,
            single: false,
            operations,
        }
    }
}
