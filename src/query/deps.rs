//! Dependency trees recorded while executing a query.
//!
//! A [`DependencyTree`] lists everything a result was built from:
//! - exact reads: entity → field paths read from it
//! - containment: traversals whose membership the result depends on
//!
//! Collections are B-trees so two executions that read the same things
//! produce byte-identical trees and the same [`DependencyTree::version`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::{ContentHash, EntityId, FieldPath};
use crate::store::Traversal;

/// Field every entity exposes for its parent ids; changes when an entity
/// is created, moved or deleted.
pub const PARENTS_FIELD: &str = "parents";

/// A containment relation: the result depends on which entities are
/// reachable from `root` via `traversal`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainsDep {
    pub root: EntityId,
    pub traversal: Traversal,
    /// Type prefix the matched entities are restricted to, if known.
    pub type_prefix: Option<String>,
    /// Fields whose change can alter membership or order.
    pub fields: BTreeSet<FieldPath>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyTree {
    pub ids: BTreeMap<EntityId, BTreeSet<FieldPath>>,
    pub contains: BTreeSet<ContainsDep>,
}

impl DependencyTree {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&mut self, id: &EntityId, field: &FieldPath) {
        if let Some(fields) = self.ids.get_mut(id) {
            fields.insert(field.clone());
        } else {
            self.ids.insert(id.clone(), BTreeSet::from([field.clone()]));
        }
    }

    pub fn record_contains(&mut self, dep: ContainsDep) {
        self.contains.insert(dep);
    }

    /// Merge another tree into this one.
    pub fn extend(&mut self, other: DependencyTree) {
        for (id, fields) in other.ids {
            self.ids.entry(id).or_default().extend(fields);
        }
        self.contains.extend(other.contains);
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.contains.is_empty()
    }

    /// Content hash of the tree.
    pub fn version(&self) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        for (id, fields) in &self.ids {
            hasher.update(b"I");
            update_str(&mut hasher, id.as_str());
            for field in fields {
                update_str(&mut hasher, field.as_str());
            }
        }
        for dep in &self.contains {
            hasher.update(b"C");
            update_str(&mut hasher, dep.root.as_str());
            update_str(&mut hasher, dep.traversal.as_str());
            update_str(&mut hasher, dep.type_prefix.as_deref().unwrap_or(""));
            for field in &dep.fields {
                update_str(&mut hasher, field.as_str());
            }
        }
        ContentHash::new(*hasher.finalize().as_bytes())
    }
}

fn update_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
