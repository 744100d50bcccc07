//! Change batches and reconnects.
//!
//! ```text
//! Batch ──lookup──▶ direct hits ──────────────────────────▶ trigger
//!          │
//!          └──────▶ candidates ──contains() task──▶ Confirmed ──▶ trigger
//! ```
//!
//! Candidates from a delete are triggered without confirmation: a deleted
//! entity is no longer inside anything the store could check.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::oneshot;

use super::Manager;
use crate::actor::messages::ManagerMsg;
use crate::cache::ResultCache;
use crate::core::{Channel, EntityId, Origin};
use crate::listener::OriginEvent;
use crate::pipeline::register_markers;
use crate::store::{GraphStore, StoreEvent};
use crate::tree::{ContainerKey, Lookup};
use crate::{debug, log};

type Checks = FxHashMap<(EntityId, ContainerKey), FxHashSet<Channel>>;

/// Channels to trigger, each once, in first-seen order.
#[derive(Default)]
struct Affected {
    order: Vec<Channel>,
    seen: FxHashSet<Channel>,
}

impl Affected {
    fn add(&mut self, channel: Channel) {
        if self.seen.insert(channel) {
            self.order.push(channel);
        }
    }
}

impl<S: GraphStore, C: ResultCache> Manager<S, C> {
    pub(super) fn on_origin_event(&mut self, origin: Origin, event: OriginEvent) {
        match event {
            OriginEvent::Batch(events) => self.on_batch(&origin, events),
            OriginEvent::Disconnected => {
                if let Some(state) = self.origins.get_mut(&origin) {
                    state.available = false;
                }
                log!("manager"; "{} unavailable, changes are missed until it reconnects", origin);
            }
            OriginEvent::Reconnected { ack } => self.on_reconnected(origin, ack),
        }
    }

    fn on_batch(&mut self, origin: &Origin, events: Vec<StoreEvent>) {
        let Some(state) = self.origins.get(origin) else {
            return;
        };

        let mut affected = Affected::default();
        let mut checks = Checks::default();
        for event in events {
            match event {
                StoreEvent::Update { id, field } => {
                    let lookup = state.tree.lookup(&id, &field);
                    collect(&mut affected, &mut checks, lookup, Some(&id));
                }
                StoreEvent::Delete { id, fields } => {
                    for field in &fields {
                        let lookup = state.tree.lookup(&id, field);
                        collect(&mut affected, &mut checks, lookup, None);
                    }
                }
                StoreEvent::SchemaUpdate => {
                    let channel = Channel::schema(origin);
                    if self.subscriptions.contains_key(&channel) {
                        affected.add(channel);
                    }
                }
                StoreEvent::Heartbeat => {}
            }
        }

        // Already triggered directly, no need to confirm.
        checks.retain(|_, channels| {
            channels.retain(|c| !affected.seen.contains(c));
            !channels.is_empty()
        });

        debug!(
            "manager"; "batch on {}: {} affected, {} containment checks",
            origin, affected.order.len(), checks.len()
        );
        for channel in affected.order {
            self.trigger(channel);
        }
        if !checks.is_empty() {
            self.spawn_confirm(origin.clone(), checks);
        }
    }

    /// Confirm containment candidates against the store. A failed check
    /// counts as affected.
    fn spawn_confirm(&self, origin: Origin, checks: Checks) {
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut channels = Vec::new();
            for ((entity, key), candidates) in checks {
                match store.contains(&origin, &key.root, key.traversal, &entity).await {
                    Ok(false) => continue,
                    Ok(true) => {}
                    Err(e) => {
                        debug!("manager"; "containment check failed, treating as affected: {}", e);
                    }
                }
                channels.extend(candidates);
            }
            if !channels.is_empty() {
                let _ = tx.send(ManagerMsg::Confirmed { channels });
            }
        });
    }

    pub(super) fn on_confirmed(&mut self, channels: Vec<Channel>) {
        let mut affected = Affected::default();
        for channel in channels {
            affected.add(channel);
        }
        for channel in affected.order {
            self.trigger(channel);
        }
    }

    /// Resend every marker of the origin, then let the listener resume.
    fn on_reconnected(&mut self, origin: Origin, ack: oneshot::Sender<()>) {
        let mut resend = Vec::new();
        if let Some(state) = self.origins.get_mut(&origin) {
            state.available = true;
            for channel in &state.subscriptions {
                if let Some(markers) = self.subscriptions.get(channel).and_then(|s| s.markers.clone()) {
                    resend.push((*channel, markers));
                }
            }
        }

        debug!("manager"; "resending markers of {} subscriptions on {}", resend.len(), origin);
        let store = Arc::clone(&self.store);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            for (channel, markers) in resend {
                register_markers(store.as_ref(), &origin, channel, &markers).await;
            }
            let _ = ack.send(());
            let _ = tx.send(ManagerMsg::Resync { origin });
        });
    }

    /// Catch up on changes missed while disconnected.
    pub(super) fn on_resync(&mut self, origin: &Origin) {
        if !self.config.load().listener.resync_on_reconnect {
            return;
        }
        let channels: Vec<Channel> = self
            .origins
            .get(origin)
            .map(|state| state.subscriptions.iter().copied().collect())
            .unwrap_or_default();
        for channel in channels {
            self.trigger(channel);
        }
    }
}

/// Merge one lookup. With `entity`, candidates are queued for containment
/// checks; without, they are affected outright.
fn collect(affected: &mut Affected, checks: &mut Checks, lookup: Lookup, entity: Option<&EntityId>) {
    let Lookup { direct, candidates } = lookup;
    for channel in direct {
        affected.add(channel);
    }
    for (key, channels) in candidates {
        match entity {
            Some(entity) => checks
                .entry((entity.clone(), key))
                .or_default()
                .extend(channels),
            None => channels.into_iter().for_each(|c| affected.add(c)),
        }
    }
}
