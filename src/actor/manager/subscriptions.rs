use std::sync::Arc;

use rustc_hash::FxHashSet;
use tokio::task::{AbortHandle, JoinHandle};

use super::Manager;
use crate::actor::LiveQueryError;
use crate::actor::messages::ManagerMsg;
use crate::cache::ResultCache;
use crate::core::{Channel, ClientId, Origin, Version};
use crate::pipeline::{
    Completion, Job, JobKind, Markers, Outcome, RecomputeContext, RecomputeGate, TreeUpdate,
    Trigger, recompute,
};
use crate::query::Query;
use crate::store::GraphStore;
use crate::{debug, log};

pub(super) struct Subscription {
    pub(super) kind: JobKind,
    pub(super) origin: Origin,
    /// Distinguishes a recreated subscription from its destroyed namesake.
    pub(super) generation: u64,
    pub(super) gate: RecomputeGate,
    pub(super) version: Option<Version>,
    /// Tree currently indexed in the origin's invalidation tree.
    pub(super) tree: Option<TreeUpdate>,
    /// Markers of the last successful execution, resent on reconnect.
    pub(super) markers: Option<Arc<Markers>>,
    pub(super) clients: FxHashSet<ClientId>,
    /// In-flight attempt, cancelled on destroy.
    pub(super) running: Option<JoinHandle<()>>,
    /// Executions left running by timed-out attempts.
    pub(super) detached: Vec<AbortHandle>,
}

impl<S: GraphStore, C: ResultCache> Manager<S, C> {
    pub(super) fn subscribe(&mut self, client: ClientId, query: Query) -> Result<Channel, LiveQueryError> {
        let channel = query.channel()?;
        let origin = query.origin.clone();
        self.attach(client, channel, origin, JobKind::Query(Arc::new(query)));
        Ok(channel)
    }

    pub(super) fn subscribe_schema(&mut self, client: ClientId, origin: Origin) -> Channel {
        let channel = Channel::schema(&origin);
        self.attach(client, channel, origin.clone(), JobKind::Schema(origin));
        channel
    }

    fn attach(&mut self, client: ClientId, channel: Channel, origin: Origin, kind: JobKind) {
        self.client_mut(&client).channels.insert(channel);

        if let Some(sub) = self.subscriptions.get_mut(&channel) {
            sub.clients.insert(client);
            return;
        }

        self.next_generation += 1;
        self.ensure_origin(&origin).subscriptions.insert(channel);
        self.subscriptions.insert(
            channel,
            Subscription {
                kind,
                origin,
                generation: self.next_generation,
                gate: RecomputeGate::new(),
                version: None,
                tree: None,
                markers: None,
                clients: FxHashSet::from_iter([client]),
                running: None,
                detached: Vec::new(),
            },
        );
        debug!("subscription"; "created {}", channel);
        self.trigger(channel);
    }

    /// Returns whether `client` held `channel`.
    pub(super) fn unsubscribe(&mut self, client: &ClientId, channel: Channel) -> bool {
        let held = self
            .clients
            .get_mut(client)
            .is_some_and(|state| state.channels.remove(&channel));
        if held {
            self.release(client, channel);
        }
        held
    }

    /// Drop `client` from `channel`; the last client out destroys it.
    pub(super) fn release(&mut self, client: &ClientId, channel: Channel) {
        let Some(sub) = self.subscriptions.get_mut(&channel) else {
            return;
        };
        sub.clients.remove(client);
        if sub.clients.is_empty() {
            self.destroy(channel);
        }
    }

    fn destroy(&mut self, channel: Channel) {
        let Some(sub) = self.subscriptions.remove(&channel) else {
            return;
        };

        let mut emptied = false;
        if let Some(state) = self.origins.get_mut(&sub.origin) {
            if let Some(indexed) = &sub.tree {
                state.tree.remove(channel, &indexed.tree);
            }
            state.subscriptions.remove(&channel);
            emptied = state.subscriptions.is_empty();
        }
        if emptied && let Some(state) = self.origins.remove(&sub.origin) {
            state.listener.abort();
            debug!("manager"; "stopped listener for {}", sub.origin);
        }

        // Nothing of this incarnation may write markers or results after
        // its cleanup.
        for execution in &sub.detached {
            execution.abort();
        }
        let running = sub.running;
        if let Some(running) = &running {
            running.abort();
        }

        self.cleanups.retain(|_, cleanup| !cleanup.is_finished());
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let origin = sub.origin;
        let has_markers = matches!(sub.kind, JobKind::Query(_));
        let cleanup = tokio::spawn(async move {
            if let Some(running) = running {
                let _ = running.await;
            }
            if has_markers && let Err(e) = store.remove_markers(&origin, channel).await {
                log!("marker"; "remove failed for {}: {}", channel, e);
            }
            if let Err(e) = cache.remove(channel).await {
                log!("cache"; "remove failed for {}: {}", channel, e);
            }
        });
        self.cleanups.insert(channel, cleanup);
        debug!("subscription"; "destroyed {}", channel);
    }

    /// Schedule a recompute, or coalesce into the running one.
    pub(super) fn trigger(&mut self, channel: Channel) {
        let Some(sub) = self.subscriptions.get_mut(&channel) else {
            return;
        };
        match sub.gate.trigger() {
            Trigger::Start => self.spawn_recompute(channel),
            Trigger::Coalesced => self.stats.coalesced += 1,
        }
    }

    fn spawn_recompute(&mut self, channel: Channel) {
        let Some(sub) = self.subscriptions.get_mut(&channel) else {
            return;
        };
        let generation = sub.generation;
        let job = Job {
            channel,
            generation,
            kind: sub.kind.clone(),
            last_version: sub.version,
            tree_version: sub.tree.as_ref().map(|t| t.version),
        };
        let ctx = RecomputeContext {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            config: self.config.load(),
        };
        let pending_cleanup = self.cleanups.remove(&channel);
        let tx = self.tx.clone();

        self.stats.recomputes += 1;
        sub.running = Some(tokio::spawn(async move {
            if let Some(cleanup) = pending_cleanup {
                let _ = cleanup.await;
            }
            let outcome = recompute(&ctx, job).await;
            let _ = tx.send(ManagerMsg::Recomputed {
                channel,
                generation,
                outcome,
            });
        }));
    }

    pub(super) fn on_recomputed(&mut self, channel: Channel, generation: u64, outcome: Outcome) {
        let Some(sub) = self.subscriptions.get_mut(&channel) else {
            debug!("subscription"; "discarding result of destroyed {}", channel);
            return;
        };
        if sub.generation != generation {
            debug!("subscription"; "discarding stale result of {}", channel);
            return;
        }
        sub.running = None;

        let recomputed = match outcome {
            Outcome::Published(r) => {
                self.stats.publishes += 1;
                Some(r)
            }
            Outcome::Unchanged(r) => {
                self.stats.unchanged += 1;
                Some(r)
            }
            Outcome::TimedOut(execution) => {
                self.stats.timeouts += 1;
                sub.detached.retain(|e| !e.is_finished());
                sub.detached.push(execution);
                None
            }
            Outcome::Failed(_) => {
                self.stats.failures += 1;
                None
            }
        };

        if let Some(r) = recomputed {
            sub.version = Some(r.version);
            if let Some(markers) = r.markers {
                sub.markers = Some(markers);
            }
            if let Some(update) = r.tree {
                if let Some(state) = self.origins.get_mut(&sub.origin) {
                    if let Some(old) = &sub.tree {
                        state.tree.remove(channel, &old.tree);
                    }
                    state.tree.insert(channel, &update.tree);
                }
                debug!("subscription"; "reindexed {} at tree {}", channel, update.version);
                sub.tree = Some(update);
            }
        }

        if sub.gate.complete() == Completion::Rerun {
            self.schedule_rerun(channel, generation);
        }
    }

    /// Rerun after `reprocess_delay`; the gate stays processing meanwhile.
    fn schedule_rerun(&self, channel: Channel, generation: u64) {
        let delay = self.config.load().recompute.reprocess_delay();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ManagerMsg::Rerun {
                channel,
                generation,
            });
        });
    }

    pub(super) fn on_rerun(&mut self, channel: Channel, generation: u64) {
        let Some(sub) = self.subscriptions.get(&channel) else {
            return;
        };
        if sub.generation == generation && sub.gate.is_processing() {
            self.spawn_recompute(channel);
        }
    }
}
