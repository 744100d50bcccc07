//! Invalidation tree: field path → subscriptions to recompute.
//!
//! A trie keyed by field-path segments, built from the dependency trees of
//! all subscriptions on one origin. Each node keeps three indices:
//!
//! ```text
//! node "name"
//!  ├── ids:   ma1 → {S1}                     exact reads
//!  ├── types: "ma" → (ro, children) → {S2}   containment, typed
//!  └── any:   (ro, descendants) → {S3}       containment, untyped
//! ```
//!
//! A lookup of `(entity, a.b.c)` visits the nodes for `a`, `a.b` and
//! `a.b.c`, plus everything below `a.b.c` since rewriting a field rewrites
//! its children. Exact matches are returned as `direct`; containment
//! matches are `candidates` that need a store-side containment check.

mod node;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::core::{Channel, EntityId, FieldPath};
use crate::query::DependencyTree;
use crate::store::Traversal;

use node::{Node, remove_channel};

/// Container of a containment relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerKey {
    pub root: EntityId,
    pub traversal: Traversal,
}

/// Result of [`InvalidationTree::lookup`].
#[derive(Debug, Default)]
pub struct Lookup {
    /// Subscriptions that read the changed field directly.
    pub direct: FxHashSet<Channel>,
    /// Subscriptions affected if the entity is inside the container.
    pub candidates: FxHashMap<ContainerKey, FxHashSet<Channel>>,
}

impl Lookup {
    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.candidates.is_empty()
    }

    fn add_candidates(&mut self, containers: &FxHashMap<ContainerKey, FxHashSet<Channel>>) {
        for (key, channels) in containers {
            self.candidates
                .entry(key.clone())
                .or_default()
                .extend(channels.iter().copied());
        }
    }
}

/// Per-origin trie of subscription dependencies.
#[derive(Debug, Default)]
pub struct InvalidationTree {
    root: Node,
}

impl InvalidationTree {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index `channel` under every entry of `deps`.
    pub fn insert(&mut self, channel: Channel, deps: &DependencyTree) {
        for (id, fields) in &deps.ids {
            for field in fields {
                self.root
                    .walk_mut(field.segments())
                    .ids
                    .entry(id.clone())
                    .or_default()
                    .insert(channel);
            }
        }

        for dep in &deps.contains {
            let key = ContainerKey {
                root: dep.root.clone(),
                traversal: dep.traversal,
            };
            for field in &dep.fields {
                let node = self.root.walk_mut(field.segments());
                let containers = match &dep.type_prefix {
                    Some(prefix) => node.types.entry(prefix.clone()).or_default(),
                    None => &mut node.any,
                };
                containers.entry(key.clone()).or_default().insert(channel);
            }
        }
    }

    /// Remove `channel` from every entry of `deps`, pruning empty nodes.
    pub fn remove(&mut self, channel: Channel, deps: &DependencyTree) {
        for (id, fields) in &deps.ids {
            for field in fields {
                let segments: SmallVec<[&str; 4]> = field.segments().collect();
                self.root.edit_and_prune(&segments, &mut |node: &mut Node| {
                    remove_channel(&mut node.ids, id, &channel);
                });
            }
        }

        for dep in &deps.contains {
            let key = ContainerKey {
                root: dep.root.clone(),
                traversal: dep.traversal,
            };
            for field in &dep.fields {
                let segments: SmallVec<[&str; 4]> = field.segments().collect();
                self.root.edit_and_prune(&segments, &mut |node: &mut Node| match &dep.type_prefix {
                    Some(prefix) => {
                        if let Some(containers) = node.types.get_mut(prefix) {
                            remove_channel(containers, &key, &channel);
                            if containers.is_empty() {
                                node.types.remove(prefix);
                            }
                        }
                    }
                    None => remove_channel(&mut node.any, &key, &channel),
                });
            }
        }
    }

    /// Subscriptions possibly affected by a change of `path` on `entity`.
    pub fn lookup(&self, entity: &EntityId, path: &FieldPath) -> Lookup {
        let mut out = Lookup::default();
        let mut node = &self.root;
        let mut segments = path.segments().peekable();

        while let Some(segment) = segments.next() {
            let Some(child) = node.children.get(segment) else {
                return out;
            };
            node = child;
            if segments.peek().is_some() {
                node.collect(entity, &mut out);
            } else {
                node.collect_subtree(entity, &mut out);
            }
        }
        out
    }

    /// Number of trie nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ContentHash;
    use crate::query::ContainsDep;

    fn channel(n: u8) -> Channel {
        Channel::of_value(&serde_json::json!(n))
    }

    fn reads(entries: &[(&str, &str)]) -> DependencyTree {
        let mut deps = DependencyTree::new();
        for (id, field) in entries {
            deps.record_read(&(*id).into(), &(*field).into());
        }
        deps
    }

    fn children_of(root: &str, prefix: Option<&str>, fields: &[&str]) -> DependencyTree {
        let mut deps = DependencyTree::new();
        deps.record_contains(ContainsDep {
            root: root.into(),
            traversal: Traversal::Children,
            type_prefix: prefix.map(str::to_string),
            fields: fields.iter().map(|f| FieldPath::new(f)).collect(),
        });
        deps
    }

    #[test]
    fn test_exact_read_matches_only_that_entity() {
        let mut tree = InvalidationTree::new();
        tree.insert(channel(1), &reads(&[("ma1", "name")]));

        let hit = tree.lookup(&"ma1".into(), &"name".into());
        assert!(hit.direct.contains(&channel(1)));
        assert!(tree.lookup(&"ma2".into(), &"name".into()).is_empty());
        assert!(tree.lookup(&"ma1".into(), &"score".into()).is_empty());
    }

    #[test]
    fn test_lookup_matches_shorter_prefixes() {
        let mut tree = InvalidationTree::new();
        tree.insert(channel(1), &reads(&[("ma1", "a")]));
        tree.insert(channel(2), &reads(&[("ma1", "a.b")]));
        tree.insert(channel(3), &reads(&[("ma1", "a.b.c")]));
        tree.insert(channel(4), &reads(&[("ma1", "a.x")]));

        let hit = tree.lookup(&"ma1".into(), &"a.b.c".into());
        assert!(hit.direct.contains(&channel(1)));
        assert!(hit.direct.contains(&channel(2)));
        assert!(hit.direct.contains(&channel(3)));
        assert!(!hit.direct.contains(&channel(4)));
    }

    #[test]
    fn test_lookup_includes_subtree_of_changed_path() {
        let mut tree = InvalidationTree::new();
        tree.insert(channel(1), &reads(&[("ma1", "a.b")]));

        let hit = tree.lookup(&"ma1".into(), &"a".into());
        assert!(hit.direct.contains(&channel(1)));
    }

    #[test]
    fn test_typed_containment_filters_by_prefix() {
        let mut tree = InvalidationTree::new();
        tree.insert(channel(1), &children_of("ro", Some("ma"), &["type"]));

        let hit = tree.lookup(&"ma9".into(), &"type".into());
        let key = ContainerKey {
            root: "ro".into(),
            traversal: Traversal::Children,
        };
        assert!(hit.direct.is_empty());
        assert!(hit.candidates[&key].contains(&channel(1)));

        assert!(tree.lookup(&"te1".into(), &"type".into()).is_empty());
    }

    #[test]
    fn test_untyped_containment_matches_any_entity() {
        let mut tree = InvalidationTree::new();
        tree.insert(channel(1), &children_of("ro", None, &["parents"]));
        assert!(!tree.lookup(&"xx1".into(), &"parents".into()).candidates.is_empty());
    }

    #[test]
    fn test_remove_prunes_to_baseline() {
        let mut tree = InvalidationTree::new();
        tree.insert(channel(1), &reads(&[("ma1", "name")]));
        let baseline = tree.node_count();

        let mut deps = reads(&[("ma2", "stats.goals"), ("ma2", "name")]);
        deps.extend(children_of("ro", Some("ma"), &["type", "parents", "stats.goals"]));
        tree.insert(channel(2), &deps);
        assert!(tree.node_count() > baseline);

        tree.remove(channel(2), &deps);
        assert_eq!(tree.node_count(), baseline);

        tree.remove(channel(1), &reads(&[("ma1", "name")]));
        assert!(tree.is_empty());
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_remove_keeps_shared_entries() {
        let mut tree = InvalidationTree::new();
        let deps = reads(&[("ma1", "name")]);
        tree.insert(channel(1), &deps);
        tree.insert(channel(2), &deps);
        tree.remove(channel(1), &deps);

        let hit = tree.lookup(&"ma1".into(), &"name".into());
        assert_eq!(hit.direct.len(), 1);
        assert!(hit.direct.contains(&channel(2)));
    }

    #[test]
    fn test_channel_helper_distinct() {
        assert_ne!(channel(1), channel(2));
        assert_ne!(*channel(1).hash(), ContentHash::new([0; 32]));
    }
}
