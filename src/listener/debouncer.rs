use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;

use crate::core::{EntityId, FieldPath};
use crate::store::StoreEvent;

/// Pure debouncer: only handles timing and event deduplication.
///
/// The window opens with the first buffered event and is not extended by
/// later ones, so a steady stream still flushes every `window`.
pub(super) struct Debouncer {
    window: Duration,
    events: Vec<StoreEvent>,
    /// `(entity, path)` pairs of updates already in `events`
    updated: FxHashSet<(EntityId, FieldPath)>,
    /// `(entity, path)` pairs of deletes already in `events`
    deleted: FxHashSet<(EntityId, FieldPath)>,
    schema_changed: bool,
    opened: Option<Instant>,
}

impl Debouncer {
    pub(super) fn new(window: Duration) -> Self {
        Self {
            window,
            events: Vec::new(),
            updated: FxHashSet::default(),
            deleted: FxHashSet::default(),
            schema_changed: false,
            opened: None,
        }
    }

    /// Buffer one event, dropping what the batch already covers:
    /// - repeated `(entity, path)` updates keep the first occurrence
    /// - delete fields already deleted in the batch are dropped; an earlier
    ///   update never covers a delete, whose candidates skip confirmation
    /// - schema updates collapse into one
    /// - heartbeats never enter a batch
    pub(super) fn add_event(&mut self, event: StoreEvent) {
        let event = match event {
            StoreEvent::Heartbeat => return,
            StoreEvent::SchemaUpdate => {
                if std::mem::replace(&mut self.schema_changed, true) {
                    return;
                }
                StoreEvent::SchemaUpdate
            }
            StoreEvent::Update { id, field } => {
                if !self.updated.insert((id.clone(), field.clone())) {
                    return;
                }
                StoreEvent::Update { id, field }
            }
            StoreEvent::Delete { id, fields } => {
                let fields: Vec<_> = fields
                    .into_iter()
                    .filter(|f| self.deleted.insert((id.clone(), f.clone())))
                    .collect();
                if fields.is_empty() {
                    return;
                }
                StoreEvent::Delete { id, fields }
            }
        };

        self.events.push(event);
        self.opened.get_or_insert_with(Instant::now);
    }

    pub(super) fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub(super) fn is_ready(&self) -> bool {
        self.opened
            .is_some_and(|opened| opened.elapsed() >= self.window)
    }

    /// Take the batch if the window elapsed.
    pub(super) fn take_if_ready(&mut self) -> Option<Vec<StoreEvent>> {
        if !self.is_ready() {
            return None;
        }
        self.take()
    }

    /// Take whatever is buffered, ready or not.
    pub(super) fn take(&mut self) -> Option<Vec<StoreEvent>> {
        self.opened = None;
        self.updated.clear();
        self.deleted.clear();
        self.schema_changed = false;
        let events = std::mem::take(&mut self.events);
        (!events.is_empty()).then_some(events)
    }

    /// Precise sleep duration until the batch is ready.
    pub(super) fn sleep_duration(&self) -> Duration {
        let Some(opened) = self.opened else {
            return Duration::from_secs(86400);
        };
        self.window
            .saturating_sub(opened.elapsed())
            .max(Duration::from_millis(1))
    }
}
