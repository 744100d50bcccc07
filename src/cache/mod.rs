//! Shared result cache and version publishing.
//!
//! Every subscription persists its latest `{payload, version, patch, tree}`
//! under its channel and announces new versions on a pub/sub topic as
//! `[new]` or `[new, previous]`. Subscribers fetch the payload or apply the
//! patch when `previous` matches what they hold.

mod memory;

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::{Channel, Version};
use crate::diff::Patch;
use crate::query::DependencyTree;

pub use memory::MemoryCache;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Patch from the version `from` to the version it is stored with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub patch: Patch,
    pub from: Version,
}

/// Latest result of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub payload: Arc<Value>,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<PatchRecord>,
}

/// Everything the cache holds for one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: Option<CachedResult>,
    pub tree: Option<DependencyTree>,
}

/// Version change announcement for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionNotice {
    pub channel: Channel,
    pub version: Version,
    pub previous: Option<Version>,
}

impl VersionNotice {
    /// Wire form: `[new]` or `[new, previous]`.
    pub fn versions(&self) -> Vec<Version> {
        let mut out = vec![self.version];
        out.extend(self.previous);
        out
    }
}

/// Keyed result store plus publish topic.
pub trait ResultCache: Send + Sync + 'static {
    fn entry(&self, channel: Channel) -> impl Future<Output = Result<CacheEntry, CacheError>> + Send;

    fn store_result(
        &self,
        channel: Channel,
        result: CachedResult,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn store_tree(
        &self,
        channel: Channel,
        tree: DependencyTree,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn remove(&self, channel: Channel) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn publish(&self, notice: VersionNotice) -> impl Future<Output = Result<(), CacheError>> + Send;
}
