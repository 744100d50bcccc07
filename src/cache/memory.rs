//! In-process [`ResultCache`] backed by `DashMap` and a broadcast topic.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{CacheEntry, CacheError, CachedResult, ResultCache, VersionNotice};
use crate::core::Channel;
use crate::query::DependencyTree;

/// Capacity of the publish topic; slow receivers observe `Lagged`.
const TOPIC_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<Channel, CacheEntry>>,
    topic: broadcast::Sender<VersionNotice>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        let (topic, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            entries: Arc::new(DashMap::new()),
            topic,
        }
    }

    /// Receive every published notice from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<VersionNotice> {
        self.topic.subscribe()
    }

    /// Latest stored result of `channel`.
    pub fn result(&self, channel: Channel) -> Option<CachedResult> {
        self.entries.get(&channel).and_then(|e| e.result.clone())
    }

    pub fn tree(&self, channel: Channel) -> Option<DependencyTree> {
        self.entries.get(&channel).and_then(|e| e.tree.clone())
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.entries.contains_key(&channel)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResultCache for MemoryCache {
    async fn entry(&self, channel: Channel) -> Result<CacheEntry, CacheError> {
        Ok(self
            .entries
            .get(&channel)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }

    async fn store_result(&self, channel: Channel, result: CachedResult) -> Result<(), CacheError> {
        self.entries.entry(channel).or_default().result = Some(result);
        Ok(())
    }

    async fn store_tree(&self, channel: Channel, tree: DependencyTree) -> Result<(), CacheError> {
        self.entries.entry(channel).or_default().tree = Some(tree);
        Ok(())
    }

    async fn remove(&self, channel: Channel) -> Result<(), CacheError> {
        self.entries.remove(&channel);
        Ok(())
    }

    async fn publish(&self, notice: VersionNotice) -> Result<(), CacheError> {
        // No receivers is not an error
        let _ = self.topic.send(notice);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ContentHash;
    use serde_json::json;

    fn channel() -> Channel {
        Channel::of_value(&json!("q"))
    }

    #[tokio::test]
    async fn test_store_and_remove() {
        let cache = MemoryCache::new();
        assert_eq!(cache.entry(channel()).await.unwrap(), CacheEntry::default());

        let result = CachedResult {
            payload: Arc::new(json!({"a": 1})),
            version: ContentHash::of_value(&json!({"a": 1})),
            patch: None,
        };
        cache.store_result(channel(), result.clone()).await.unwrap();
        cache.store_tree(channel(), DependencyTree::new()).await.unwrap();

        let entry = cache.entry(channel()).await.unwrap();
        assert_eq!(entry.result, Some(result));
        assert_eq!(entry.tree, Some(DependencyTree::new()));

        cache.remove(channel()).await.unwrap();
        assert!(!cache.contains(channel()));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let cache = MemoryCache::new();
        let mut rx = cache.subscribe();
        let notice = VersionNotice {
            channel: channel(),
            version: ContentHash::of_bytes(b"v"),
            previous: None,
        };
        cache.publish(notice.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), notice);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let cache = MemoryCache::new();
        let notice = VersionNotice {
            channel: channel(),
            version: ContentHash::of_bytes(b"v"),
            previous: None,
        };
        assert!(cache.publish(notice).await.is_ok());
    }
}
