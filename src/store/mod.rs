//! Graph store interface.
//!
//! The engine consumes an origin database through [`GraphStore`]: field
//! reads, breadth-first traversals with compiled filters, containment
//! checks, the change-event stream and marker registration. Every call
//! names the origin it targets.
//!
//! [`MemoryStore`] is an in-process implementation used by tests and by
//! embedders that keep their graph in memory.

mod memory;
mod types;

use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::{Channel, EntityId, FieldPath, Origin};

pub use memory::MemoryStore;
pub use types::{
    FindRequest, Marker, MarkerId, Schema, Sort, SortOrder, StoreError, StoreEvent, Traversal,
};

/// Store-side operations the engine depends on.
///
/// Marker calls are idempotent: registering the same id twice, refreshing
/// an unknown channel or removing markers twice are not errors.
pub trait GraphStore: Send + Sync + 'static {
    /// Read one field of an entity. `None` when the entity or field is absent.
    fn get_field(
        &self,
        origin: &Origin,
        id: &EntityId,
        path: &FieldPath,
    ) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Ids reachable from `request.root`, breadth-first, filtered, sorted
    /// and paginated.
    fn find(
        &self,
        origin: &Origin,
        request: FindRequest,
    ) -> impl Future<Output = Result<Vec<EntityId>, StoreError>> + Send;

    /// Whether `id` is reachable from `root` via `traversal`.
    fn contains(
        &self,
        origin: &Origin,
        root: &EntityId,
        traversal: Traversal,
        id: &EntityId,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn schema(&self, origin: &Origin) -> impl Future<Output = Result<Schema, StoreError>> + Send;

    /// Open the change-event stream of an origin. The receiver closing
    /// means the connection was lost.
    fn events(
        &self,
        origin: &Origin,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<StoreEvent>, StoreError>> + Send;

    fn register_marker(
        &self,
        origin: &Origin,
        channel: Channel,
        id: MarkerId,
        marker: &Marker,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Make the store re-evaluate the markers of `channel`.
    fn refresh_markers(
        &self,
        origin: &Origin,
        channel: Channel,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn remove_markers(
        &self,
        origin: &Origin,
        channel: Channel,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
