//! One recompute attempt.
//!
//! ```text
//! spawn(execute + register markers) ──timeout──▶ version ──▶ diff ──▶ persist ──▶ publish
//!         │                              │          │
//!         │ error: {"$error": msg}       │          └─ equal to last: Unchanged
//!         └──────────────────────────────┘ elapsed: TimedOut (task keeps running)
//! ```
//!
//! The attempt never touches subscription state; it returns an [`Outcome`]
//! the manager applies. Dropping the attempt before the timeout elapses
//! aborts the execution task with it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tokio::task::AbortHandle;

use crate::cache::{CacheError, CachedResult, PatchRecord, ResultCache, VersionNotice};
use crate::config::LiveConfig;
use crate::core::{Channel, ContentHash, Origin, Version};
use crate::diff::diff_payloads;
use crate::query::{DependencyTree, Query, execute};
use crate::store::{GraphStore, Marker, MarkerId};
use crate::{debug, log};

/// Key of the structured error payload.
pub const ERROR_FIELD: &str = "$error";

pub type Markers = BTreeMap<MarkerId, Marker>;

/// Shared collaborators of every recompute.
pub struct RecomputeContext<S, C> {
    pub store: Arc<S>,
    pub cache: Arc<C>,
    pub config: Arc<LiveConfig>,
}

impl<S, C> Clone for RecomputeContext<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobKind {
    Query(Arc<Query>),
    /// Publishes the schema of an origin.
    Schema(Origin),
}

/// Input of one attempt: what to run and what was last published.
#[derive(Debug, Clone)]
pub struct Job {
    pub channel: Channel,
    pub generation: u64,
    pub kind: JobKind,
    pub last_version: Option<Version>,
    pub tree_version: Option<ContentHash>,
}

/// New dependency tree, present only when its version changed.
#[derive(Debug, Clone)]
pub struct TreeUpdate {
    pub tree: Arc<DependencyTree>,
    pub version: ContentHash,
}

#[derive(Debug, Clone)]
pub struct Recomputed {
    pub version: Version,
    pub tree: Option<TreeUpdate>,
    /// Markers of a successful execution; `None` keeps the previous ones.
    pub markers: Option<Arc<Markers>>,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Published(Recomputed),
    /// Output structurally identical to the last published one.
    Unchanged(Recomputed),
    /// The execution task still runs; aborting it is up to the owner of
    /// the subscription.
    TimedOut(AbortHandle),
    /// Result could not be persisted or published; nothing was recorded.
    Failed(CacheError),
}

/// Raw output of the spawned execution task.
struct Computed {
    payload: Value,
    deps: Option<(DependencyTree, Markers)>,
}

/// Run one recompute attempt of `job`.
pub async fn recompute<S, C>(ctx: &RecomputeContext<S, C>, job: Job) -> Outcome
where
    S: GraphStore,
    C: ResultCache,
{
    let started = Instant::now();
    let config = &ctx.config;
    let mut task = tokio::spawn(compute(Arc::clone(&ctx.store), job.channel, job.kind.clone()));
    let mut guard = AbortOnDrop(Some(task.abort_handle()));

    // On timeout the task is detached, not cancelled; the store call
    // finishes in the background and its result is discarded.
    let computed = match tokio::time::timeout(config.recompute.timeout(), &mut task).await {
        Ok(Ok(computed)) => computed,
        Ok(Err(e)) => Computed {
            payload: error_payload(&format!("recompute task failed: {e}")),
            deps: None,
        },
        Err(_) => {
            log!("recompute"; "timed out after {:?}: {}", config.recompute.timeout(), job.channel);
            guard.disarm();
            return Outcome::TimedOut(task.abort_handle());
        }
    };

    let outcome = finish(ctx, &job, computed).await;

    let elapsed = started.elapsed();
    if elapsed > config.recompute.slow_query() {
        log!("recompute"; "slow recompute {} took {:?}", job.channel, elapsed);
    }
    outcome
}

/// Aborts the execution task when an attempt is cancelled mid-flight.
struct AbortOnDrop(Option<AbortHandle>);

impl AbortOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// Execute and register markers. Runs in its own task.
async fn compute<S: GraphStore>(store: Arc<S>, channel: Channel, kind: JobKind) -> Computed {
    match kind {
        JobKind::Schema(origin) => {
            let payload = match store.schema(&origin).await {
                Ok(schema) => json!(schema.types),
                Err(e) => error_payload(&e.to_string()),
            };
            Computed {
                payload,
                deps: None,
            }
        }
        JobKind::Query(query) => match execute(store.as_ref(), &query).await {
            Ok(execution) => {
                register_markers(store.as_ref(), &query.origin, channel, &execution.markers).await;
                Computed {
                    payload: execution.payload,
                    deps: Some((execution.deps, execution.markers)),
                }
            }
            Err(e) => {
                debug!("recompute"; "execution failed for {}: {}", channel, e);
                Computed {
                    payload: error_payload(&e.to_string()),
                    deps: None,
                }
            }
        },
    }
}

/// Register every marker, then ask the store to re-evaluate them.
/// Failures only reduce future invalidation precision.
pub(crate) async fn register_markers<S: GraphStore>(
    store: &S,
    origin: &Origin,
    channel: Channel,
    markers: &Markers,
) {
    for (id, marker) in markers {
        if let Err(e) = store.register_marker(origin, channel, *id, marker).await {
            log!("marker"; "register failed for {}: {}", channel, e);
        }
    }
    if let Err(e) = store.refresh_markers(origin, channel).await {
        log!("marker"; "refresh failed for {}: {}", channel, e);
    }
}

async fn finish<S, C>(ctx: &RecomputeContext<S, C>, job: &Job, computed: Computed) -> Outcome
where
    S: GraphStore,
    C: ResultCache,
{
    let Computed { payload, deps } = computed;
    let version = ContentHash::of_value(&payload);

    let (tree, markers) = match deps {
        Some((deps, markers)) => {
            let tree_version = deps.version();
            let tree = if job.tree_version == Some(tree_version) {
                None
            } else {
                if let Err(e) = ctx.cache.store_tree(job.channel, deps.clone()).await {
                    log!("cache"; "failed to store tree of {}: {}", job.channel, e);
                }
                Some(TreeUpdate {
                    tree: Arc::new(deps),
                    version: tree_version,
                })
            };
            (tree, Some(Arc::new(markers)))
        }
        None => (None, None),
    };

    let recomputed = Recomputed {
        version,
        tree,
        markers,
    };
    if job.last_version == Some(version) {
        debug!("recompute"; "unchanged {}", job.channel);
        return Outcome::Unchanged(recomputed);
    }

    let payload = Arc::new(payload);
    let previous = match ctx.cache.entry(job.channel).await {
        Ok(entry) => entry.result,
        Err(e) => {
            log!("cache"; "failed to read {}: {}", job.channel, e);
            None
        }
    };
    // Already cached at this version, e.g. written by a recreated subscription.
    if previous.as_ref().is_some_and(|prev| prev.version == version) {
        debug!("recompute"; "unchanged {} (cached)", job.channel);
        return Outcome::Unchanged(recomputed);
    }

    let patch = match &previous {
        Some(prev) => {
            let diff = &ctx.config.diff;
            match diff_payloads(
                Arc::clone(&prev.payload),
                Arc::clone(&payload),
                diff.options(),
                diff.offload_threshold,
            )
            .await
            {
                Ok(patch) => patch.map(|patch| PatchRecord {
                    patch,
                    from: prev.version,
                }),
                Err(e) => {
                    log!("diff"; "{} for {}, publishing full payload", e, job.channel);
                    None
                }
            }
        }
        None => None,
    };

    let result = CachedResult {
        payload,
        version,
        patch,
    };
    if let Err(e) = ctx.cache.store_result(job.channel, result).await {
        log!("cache"; "failed to store result of {}: {}", job.channel, e);
        return Outcome::Failed(e);
    }

    let notice = VersionNotice {
        channel: job.channel,
        version,
        previous: previous.map(|p| p.version).or(job.last_version),
    };
    if let Err(e) = ctx.cache.publish(notice).await {
        log!("cache"; "failed to publish {}: {}", job.channel, e);
        return Outcome::Failed(e);
    }

    debug!("recompute"; "published {} at {}", job.channel, version);
    Outcome::Published(recomputed)
}

fn error_payload(message: &str) -> Value {
    json!({ ERROR_FIELD: message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::core::{EntityId, FieldPath};
    use crate::diff::{ArrayOp, Patch};
    use crate::query::{Filter, Operation};
    use crate::store::{FindRequest, MemoryStore, Schema, StoreError, StoreEvent, Traversal};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const O: &str = "default";

    fn league() -> MemoryStore {
        let store = MemoryStore::new();
        store.update_schema(O, "match", "ma");
        store.create(O, "ro", &[], json!({"type": "root"}));
        store.create(O, "ma1", &["ro"], json!({"type": "match", "name": "m1"}));
        store.create(O, "ma2", &["ro"], json!({"type": "match", "name": "m2"}));
        store
    }

    fn matches_query() -> Query {
        Query::new("ro").with(Operation::find(
            "items",
            Traversal::Children,
            Some(Filter::eq("type", json!("match"))),
            vec![Operation::field_of("name")],
        ))
    }

    fn context<S>(store: S, cache: MemoryCache, config: LiveConfig) -> RecomputeContext<S, MemoryCache> {
        RecomputeContext {
            store: Arc::new(store),
            cache: Arc::new(cache),
            config: Arc::new(config),
        }
    }

    fn job(query: &Query, last: Option<&Recomputed>) -> Job {
        Job {
            channel: query.channel().unwrap(),
            generation: 0,
            kind: JobKind::Query(Arc::new(query.clone())),
            last_version: last.map(|r| r.version),
            tree_version: last.and_then(|r| r.tree.as_ref().map(|t| t.version)),
        }
    }

    fn published(outcome: Outcome) -> Recomputed {
        match outcome {
            Outcome::Published(r) => r,
            other => panic!("expected publish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_recompute_publishes_without_patch() {
        let store = league();
        let cache = MemoryCache::new();
        let mut notices = cache.subscribe();
        let ctx = context(store.clone(), cache.clone(), LiveConfig::default());
        let query = matches_query();

        let first = published(recompute(&ctx, job(&query, None)).await);
        assert!(first.tree.is_some());
        assert_eq!(first.markers.as_ref().map(|m| m.len()), Some(3));

        let channel = query.channel().unwrap();
        let stored = cache.result(channel).unwrap();
        assert_eq!(*stored.payload, json!({"items": [{"name": "m1"}, {"name": "m2"}]}));
        assert!(stored.patch.is_none());
        assert!(cache.tree(channel).is_some());
        assert_eq!(store.markers(O, channel).len(), 3);
        assert_eq!(store.refresh_count(O), 1);

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.versions(), vec![first.version]);
    }

    #[tokio::test]
    async fn test_change_publishes_nested_array_patch() {
        let store = league();
        let cache = MemoryCache::new();
        let mut notices = cache.subscribe();
        let ctx = context(store.clone(), cache.clone(), LiveConfig::default());
        let query = matches_query();

        let first = published(recompute(&ctx, job(&query, None)).await);
        store.set(O, "ma1", "name", json!("m1b")).unwrap();
        let second = published(recompute(&ctx, job(&query, Some(&first))).await);
        assert!(second.tree.is_none());

        let stored = cache.result(query.channel().unwrap()).unwrap();
        let record = stored.patch.unwrap();
        assert_eq!(record.from, first.version);
        let Patch::Object(fields) = record.patch else {
            panic!("expected object patch");
        };
        let Some(Patch::Array(array)) = fields.get("items") else {
            panic!("expected array patch");
        };
        assert!(array.ops.iter().any(|op| matches!(op, ArrayOp::Nested { at: 0, .. })));

        notices.recv().await.unwrap();
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.versions(), vec![second.version, first.version]);
    }

    #[tokio::test]
    async fn test_identical_output_is_unchanged() {
        let store = league();
        let cache = MemoryCache::new();
        let mut notices = cache.subscribe();
        let ctx = context(store.clone(), cache, LiveConfig::default());
        let query = matches_query();

        let first = published(recompute(&ctx, job(&query, None)).await);
        notices.recv().await.unwrap();

        let outcome = recompute(&ctx, job(&query, Some(&first))).await;
        let Outcome::Unchanged(again) = outcome else {
            panic!("expected unchanged");
        };
        assert_eq!(again.version, first.version);
        assert!(again.tree.is_none());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_timeout_discards_result() {
        let store = league();
        store.set_latency(Some(Duration::from_millis(200)));
        let cache = MemoryCache::new();
        let mut config = LiveConfig::default();
        config.recompute.timeout_ms = 20;
        let ctx = context(store, cache.clone(), config);
        let query = matches_query();

        let outcome = recompute(&ctx, job(&query, None)).await;
        assert!(matches!(outcome, Outcome::TimedOut(_)));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(cache.result(query.channel().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_dropped_attempt_aborts_execution() {
        let store = league();
        store.set_latency(Some(Duration::from_millis(100)));
        let ctx = context(store.clone(), MemoryCache::new(), LiveConfig::default());
        let query = matches_query();
        let channel = query.channel().unwrap();

        let attempt = tokio::spawn({
            let job = job(&query, None);
            async move { recompute(&ctx, job).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        attempt.abort();

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.markers(O, channel).is_empty());
        assert_eq!(store.refresh_count(O), 0);
    }

    #[tokio::test]
    async fn test_cached_version_is_not_republished() {
        let store = league();
        let cache = MemoryCache::new();
        let ctx = context(store, cache.clone(), LiveConfig::default());
        let query = matches_query();
        let first = published(recompute(&ctx, job(&query, None)).await);

        // A caller that never saw `first` still finds it cached.
        let mut notices = cache.subscribe();
        let outcome = recompute(&ctx, job(&query, None)).await;
        let Outcome::Unchanged(again) = outcome else {
            panic!("expected unchanged");
        };
        assert_eq!(again.version, first.version);
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_schema_job() {
        let store = league();
        let cache = MemoryCache::new();
        let ctx = context(store, cache.clone(), LiveConfig::default());
        let channel = Channel::schema(&Origin::default());

        let outcome = recompute(
            &ctx,
            Job {
                channel,
                generation: 0,
                kind: JobKind::Schema(Origin::default()),
                last_version: None,
                tree_version: None,
            },
        )
        .await;
        let recomputed = published(outcome);
        assert!(recomputed.tree.is_none());
        assert!(recomputed.markers.is_none());
        assert_eq!(*cache.result(channel).unwrap().payload, json!({"match": "ma"}));
    }

    /// Store whose every call fails.
    struct DownStore;

    impl GraphStore for DownStore {
        async fn get_field(&self, _: &Origin, _: &EntityId, _: &FieldPath) -> Result<Option<Value>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn find(&self, _: &Origin, _: FindRequest) -> Result<Vec<EntityId>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn contains(&self, _: &Origin, _: &EntityId, _: Traversal, _: &EntityId) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn schema(&self, _: &Origin) -> Result<Schema, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn events(&self, _: &Origin) -> Result<mpsc::UnboundedReceiver<StoreEvent>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn register_marker(&self, _: &Origin, _: Channel, _: MarkerId, _: &Marker) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn refresh_markers(&self, _: &Origin, _: Channel) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn remove_markers(&self, _: &Origin, _: Channel) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_execution_error_becomes_payload() {
        let cache = MemoryCache::new();
        let ctx = context(DownStore, cache.clone(), LiveConfig::default());
        let query = Query::new("ro").with(Operation::field_of("name"));

        let recomputed = published(recompute(&ctx, job(&query, None)).await);
        assert!(recomputed.tree.is_none());
        assert!(recomputed.markers.is_none());

        let payload = cache.result(query.channel().unwrap()).unwrap().payload;
        assert!(payload[ERROR_FIELD].as_str().unwrap().contains("down"));
    }
}
