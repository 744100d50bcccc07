//! In-memory hierarchical graph store.
//!
//! Entities live per origin with ordered parent/child links and a JSON
//! object of fields. Mutations emit [`StoreEvent`]s to every open event
//! stream of the origin:
//!
//! | mutation        | events                                        |
//! |-----------------|-----------------------------------------------|
//! | `create`        | `Update(id, parents)`, `Update(id, field)` each, `Update(parent, children)` |
//! | `set`           | `Update(id, path)`                             |
//! | `delete`        | `Delete(id, fields + parents)`, `Update(parent, children)` |
//! | `update_schema` | `SchemaUpdate`                                 |
//!
//! Test controls: `restart` drops every open stream and registered marker
//! of an origin (a store restart), `fail_next_connects` makes the next
//! `events` calls fail, `fail_contains` makes containment checks error,
//! `set_latency` delays every async call.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::{FindRequest, GraphStore, Marker, MarkerId, Schema, SortOrder, StoreError, StoreEvent, Traversal};
use crate::core::{Channel, EntityId, FieldPath, Origin};
use crate::query::PARENTS_FIELD;

const ID_FIELD: &str = "id";
const CHILDREN_FIELD: &str = "children";

/// Shared handle to an in-memory store; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    find_calls: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
struct Inner {
    origins: FxHashMap<Origin, OriginData>,
    failing_connects: usize,
    failing_contains: bool,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct OriginData {
    entities: FxHashMap<EntityId, Entity>,
    schema: Schema,
    streams: Vec<mpsc::UnboundedSender<StoreEvent>>,
    markers: FxHashMap<Channel, BTreeMap<MarkerId, Marker>>,
    refreshes: usize,
}

#[derive(Debug, Default, Clone)]
struct Entity {
    parents: Vec<EntityId>,
    children: Vec<EntityId>,
    fields: Map<String, Value>,
}

// =============================================================================
// Entity
// =============================================================================

impl Entity {
    fn get(&self, id: &EntityId, path: &FieldPath) -> Option<Value> {
        match path.as_str() {
            ID_FIELD => Some(Value::String(id.to_string())),
            PARENTS_FIELD => Some(ids_value(&self.parents)),
            CHILDREN_FIELD => Some(ids_value(&self.children)),
            _ => lookup_path(&self.fields, path).cloned(),
        }
    }

    /// Fields plus the virtual `id` and `parents`, for filter evaluation.
    fn view(&self, id: &EntityId) -> Map<String, Value> {
        let mut view = self.fields.clone();
        view.insert(ID_FIELD.into(), Value::String(id.to_string()));
        view.insert(PARENTS_FIELD.into(), ids_value(&self.parents));
        view
    }
}

fn ids_value(ids: &[EntityId]) -> Value {
    Value::Array(ids.iter().map(|id| Value::String(id.to_string())).collect())
}

fn lookup_path<'a>(fields: &'a Map<String, Value>, path: &FieldPath) -> Option<&'a Value> {
    let mut segments = path.segments();
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

fn set_path(fields: &mut Map<String, Value>, path: &FieldPath, value: Value) {
    let segments: Vec<&str> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = fields;
    for segment in parents {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        current = next;
    }
    current.insert(last.to_string(), value);
}

fn remove_path(fields: &mut Map<String, Value>, path: &FieldPath) -> bool {
    let segments: Vec<&str> = path.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return false;
    };
    let mut current = fields;
    for segment in parents {
        let Some(Value::Object(next)) = current.get_mut(*segment) else {
            return false;
        };
        current = next;
    }
    current.remove(*last).is_some()
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

// =============================================================================
// Origin data
// =============================================================================

impl OriginData {
    fn emit(&mut self, event: StoreEvent) {
        self.streams.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn reachable(&self, root: &EntityId, traversal: Traversal) -> Vec<EntityId> {
        let Some(entity) = self.entities.get(root) else {
            return Vec::new();
        };
        match traversal {
            Traversal::Node => vec![root.clone()],
            Traversal::Children => entity.children.clone(),
            Traversal::Parents => entity.parents.clone(),
            Traversal::Descendants => self.breadth_first(root, |e| &e.children),
            Traversal::Ancestors => self.breadth_first(root, |e| &e.parents),
        }
    }

    fn breadth_first(&self, root: &EntityId, next: impl Fn(&Entity) -> &Vec<EntityId>) -> Vec<EntityId> {
        let mut seen = FxHashSet::default();
        seen.insert(root.clone());
        let mut queue = VecDeque::from([root.clone()]);
        let mut out = Vec::new();

        while let Some(id) = queue.pop_front() {
            let Some(entity) = self.entities.get(&id) else {
                continue;
            };
            for linked in next(entity) {
                if seen.insert(linked.clone()) {
                    out.push(linked.clone());
                    queue.push_back(linked.clone());
                }
            }
        }
        out
    }

    fn find(&self, request: &FindRequest) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .reachable(&request.root, request.traversal)
            .into_iter()
            .filter(|id| {
                let Some(entity) = self.entities.get(id) else {
                    return false;
                };
                match &request.filter {
                    Some(filter) => {
                        let view = entity.view(id);
                        filter.eval(|field| lookup_path(&view, field))
                    }
                    None => true,
                }
            })
            .collect();

        if let Some(sort) = &request.sort {
            let key = |id: &EntityId| self.entities.get(id).and_then(|e| e.get(id, &sort.field));
            ids.sort_by(|a, b| {
                let ordering = compare_values(key(a).as_ref(), key(b).as_ref());
                match sort.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        let limit = request.limit.unwrap_or(usize::MAX);
        ids.into_iter().skip(request.offset).take(limit).collect()
    }
}

// =============================================================================
// Mutations and test controls
// =============================================================================

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_origin<R>(&self, origin: &str, f: impl FnOnce(&mut OriginData) -> R) -> R {
        let mut inner = self.inner.lock();
        let data = inner.origins.entry(Origin::new(origin)).or_default();
        f(data)
    }

    /// Register a type name and its id prefix.
    pub fn update_schema(&self, origin: &str, type_name: &str, prefix: &str) {
        self.with_origin(origin, |data| {
            data.schema.types.insert(type_name.to_string(), prefix.to_string());
            data.emit(StoreEvent::SchemaUpdate);
        });
    }

    /// Create an entity under `parents` with the fields of `fields` (an object).
    pub fn create(&self, origin: &str, id: &str, parents: &[&str], fields: Value) {
        let id = EntityId::new(id);
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let field_names: Vec<String> = fields.keys().cloned().collect();
        let parents: Vec<EntityId> = parents.iter().map(|p| EntityId::new(p)).collect();

        self.with_origin(origin, |data| {
            for parent in &parents {
                if let Some(entity) = data.entities.get_mut(parent)
                    && !entity.children.contains(&id)
                {
                    entity.children.push(id.clone());
                }
            }
            data.entities.insert(
                id.clone(),
                Entity {
                    parents: parents.clone(),
                    children: Vec::new(),
                    fields,
                },
            );

            data.emit(StoreEvent::Update {
                id: id.clone(),
                field: FieldPath::new(PARENTS_FIELD),
            });
            for name in field_names {
                data.emit(StoreEvent::Update {
                    id: id.clone(),
                    field: FieldPath::from(name),
                });
            }
            for parent in parents {
                data.emit(StoreEvent::Update {
                    id: parent,
                    field: FieldPath::new(CHILDREN_FIELD),
                });
            }
        });
    }

    /// Set a (possibly nested) field.
    pub fn set(&self, origin: &str, id: &str, path: &str, value: Value) -> Result<(), StoreError> {
        self.set_many(origin, id, &[(path, value)])
    }

    /// Set several fields of one entity, emitting one update per field.
    pub fn set_many(&self, origin: &str, id: &str, updates: &[(&str, Value)]) -> Result<(), StoreError> {
        let id = EntityId::new(id);
        self.with_origin(origin, |data| {
            let entity = data
                .entities
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            for (path, value) in updates {
                set_path(&mut entity.fields, &FieldPath::new(path), value.clone());
            }
            for (path, _) in updates {
                data.emit(StoreEvent::Update {
                    id: id.clone(),
                    field: FieldPath::new(path),
                });
            }
            Ok(())
        })
    }

    /// Remove a (possibly nested) field.
    pub fn remove_field(&self, origin: &str, id: &str, path: &str) -> Result<(), StoreError> {
        let id = EntityId::new(id);
        let path = FieldPath::new(path);
        self.with_origin(origin, |data| {
            let entity = data
                .entities
                .get_mut(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            if remove_path(&mut entity.fields, &path) {
                data.emit(StoreEvent::Update { id, field: path });
            }
            Ok(())
        })
    }

    /// Delete an entity and detach it from its parents and children.
    pub fn delete(&self, origin: &str, id: &str) -> Result<(), StoreError> {
        let id = EntityId::new(id);
        self.with_origin(origin, |data| {
            let entity = data
                .entities
                .remove(&id)
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;

            for parent in &entity.parents {
                if let Some(p) = data.entities.get_mut(parent) {
                    p.children.retain(|c| c != &id);
                }
            }
            for child in &entity.children {
                if let Some(c) = data.entities.get_mut(child) {
                    c.parents.retain(|p| p != &id);
                }
            }

            let mut fields: Vec<FieldPath> = entity.fields.keys().map(|k| FieldPath::new(k)).collect();
            fields.push(FieldPath::new(PARENTS_FIELD));
            data.emit(StoreEvent::Delete { id, fields });
            for parent in entity.parents {
                data.emit(StoreEvent::Update {
                    id: parent,
                    field: FieldPath::new(CHILDREN_FIELD),
                });
            }
            Ok(())
        })
    }

    /// Emit a heartbeat on every open stream of the origin.
    pub fn heartbeat(&self, origin: &str) {
        self.with_origin(origin, |data| data.emit(StoreEvent::Heartbeat));
    }

    /// Simulate a store restart: close every event stream and forget all
    /// registered markers.
    pub fn restart(&self, origin: &str) {
        self.with_origin(origin, |data| {
            data.streams.clear();
            data.markers.clear();
        });
    }

    /// Make the next `count` calls to `events` fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.inner.lock().failing_connects = count;
    }

    /// Make every `contains` call fail while `failing` is set.
    pub fn fail_contains(&self, failing: bool) {
        self.inner.lock().failing_contains = failing;
    }

    /// Delay every async call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.inner.lock().latency = latency;
    }

    /// Number of `find` calls served so far.
    pub fn find_calls(&self) -> usize {
        self.find_calls.load(AtomicOrdering::SeqCst)
    }

    /// Markers registered for `channel`.
    pub fn markers(&self, origin: &str, channel: Channel) -> Vec<Marker> {
        self.with_origin(origin, |data| {
            data.markers
                .get(&channel)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Number of channels holding markers on the origin.
    pub fn marker_channels(&self, origin: &str) -> usize {
        self.with_origin(origin, |data| data.markers.len())
    }

    pub fn refresh_count(&self, origin: &str) -> usize {
        self.with_origin(origin, |data| data.refreshes)
    }

    /// Number of open event streams on the origin.
    pub fn open_streams(&self, origin: &str) -> usize {
        self.with_origin(origin, |data| {
            data.streams.retain(|tx| !tx.is_closed());
            data.streams.len()
        })
    }

    async fn delay(&self) {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

// =============================================================================
// GraphStore
// =============================================================================

impl GraphStore for MemoryStore {
    async fn get_field(
        &self,
        origin: &Origin,
        id: &EntityId,
        path: &FieldPath,
    ) -> Result<Option<Value>, StoreError> {
        self.delay().await;
        Ok(self.with_origin(origin.as_str(), |data| {
            data.entities.get(id).and_then(|e| e.get(id, path))
        }))
    }

    async fn find(&self, origin: &Origin, request: FindRequest) -> Result<Vec<EntityId>, StoreError> {
        self.delay().await;
        self.find_calls.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self.with_origin(origin.as_str(), |data| data.find(&request)))
    }

    async fn contains(
        &self,
        origin: &Origin,
        root: &EntityId,
        traversal: Traversal,
        id: &EntityId,
    ) -> Result<bool, StoreError> {
        self.delay().await;
        if self.inner.lock().failing_contains {
            return Err(StoreError::Unavailable(origin.to_string()));
        }
        Ok(self.with_origin(origin.as_str(), |data| {
            data.reachable(root, traversal).contains(id)
        }))
    }

    async fn schema(&self, origin: &Origin) -> Result<Schema, StoreError> {
        self.delay().await;
        Ok(self.with_origin(origin.as_str(), |data| data.schema.clone()))
    }

    async fn events(&self, origin: &Origin) -> Result<mpsc::UnboundedReceiver<StoreEvent>, StoreError> {
        {
            let mut inner = self.inner.lock();
            if inner.failing_connects > 0 {
                inner.failing_connects -= 1;
                return Err(StoreError::Unavailable(origin.to_string()));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_origin(origin.as_str(), |data| data.streams.push(tx));
        Ok(rx)
    }

    async fn register_marker(
        &self,
        origin: &Origin,
        channel: Channel,
        id: MarkerId,
        marker: &Marker,
    ) -> Result<(), StoreError> {
        self.delay().await;
        self.with_origin(origin.as_str(), |data| {
            data.markers.entry(channel).or_default().insert(id, marker.clone());
        });
        Ok(())
    }

    async fn refresh_markers(&self, origin: &Origin, _channel: Channel) -> Result<(), StoreError> {
        self.delay().await;
        self.with_origin(origin.as_str(), |data| data.refreshes += 1);
        Ok(())
    }

    async fn remove_markers(&self, origin: &Origin, channel: Channel) -> Result<(), StoreError> {
        self.with_origin(origin.as_str(), |data| {
            data.markers.remove(&channel);
        });
        Ok(())
    }
}
