//! Trie node of the invalidation tree.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{ContainerKey, Lookup};
use crate::core::{Channel, EntityId};

pub(super) type ChannelSet = FxHashSet<Channel>;

/// One path segment and the subscriptions indexed at it.
#[derive(Debug, Default)]
pub(super) struct Node {
    pub children: FxHashMap<Box<str>, Node>,
    /// Exact reads: entity → channels.
    pub ids: FxHashMap<EntityId, ChannelSet>,
    /// Typed containment: type prefix → container → channels.
    pub types: FxHashMap<String, FxHashMap<ContainerKey, ChannelSet>>,
    /// Untyped containment: container → channels.
    pub any: FxHashMap<ContainerKey, ChannelSet>,
}

impl Node {
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.ids.is_empty() && self.types.is_empty() && self.any.is_empty()
    }

    pub fn count(&self) -> usize {
        1 + self.children.values().map(Node::count).sum::<usize>()
    }

    /// Walk to the node for `segments`, creating missing nodes.
    pub fn walk_mut<'a, I>(&mut self, segments: I) -> &mut Node
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut node = self;
        for segment in segments {
            node = node.children.entry(Box::from(segment)).or_default();
        }
        node
    }

    /// Apply `edit` at the node for `segments`, then prune every node on the
    /// way back up that became empty.
    pub fn edit_and_prune(&mut self, segments: &[&str], edit: &mut dyn FnMut(&mut Node)) {
        let Some((head, rest)) = segments.split_first() else {
            edit(self);
            return;
        };
        let Some(child) = self.children.get_mut(*head) else {
            return;
        };
        child.edit_and_prune(rest, edit);
        if child.is_empty() {
            self.children.remove(*head);
        }
    }

    /// Collect the matches this node holds for `entity`.
    pub fn collect(&self, entity: &EntityId, out: &mut Lookup) {
        if let Some(channels) = self.ids.get(entity) {
            out.direct.extend(channels.iter().copied());
        }
        if let Some(containers) = self.types.get(entity.type_prefix()) {
            out.add_candidates(containers);
        }
        out.add_candidates(&self.any);
    }

    /// Collect matches of this node and all its descendants.
    pub fn collect_subtree(&self, entity: &EntityId, out: &mut Lookup) {
        self.collect(entity, out);
        for child in self.children.values() {
            child.collect_subtree(entity, out);
        }
    }
}

/// Remove `channel` from a set stored in `map`, dropping the set when empty.
pub(super) fn remove_channel<K>(map: &mut FxHashMap<K, ChannelSet>, key: &K, channel: &Channel)
where
    K: std::hash::Hash + Eq,
{
    if let Some(channels) = map.get_mut(key) {
        channels.remove(channel);
        if channels.is_empty() {
            map.remove(key);
        }
    }
}
