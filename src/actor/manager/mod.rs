//! Subscription Manager Actor
//!
//! Single owner of every piece of mutable live-query state:
//!
//! - subscription table (gate, versions, dependency tree, markers, clients)
//! - one [`InvalidationTree`] and one listener per origin
//! - client registry with heartbeat sweeping
//!
//! Store round trips, cache writes and timers run in spawned tasks that
//! report back through the inbox; handlers never await.
//!
//! # Module Structure
//!
//! - `subscriptions` - create/destroy, triggering, applying recompute outcomes
//! - `events` - change batches, containment confirmation, reconnects
//! - `clients` - heartbeats and stale-client sweeping

mod clients;
mod events;
mod subscriptions;

use std::future::pending;
use std::ops::ControlFlow;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at};

use super::messages::{ManagerMsg, Stats};
use crate::cache::ResultCache;
use crate::config::ConfigHandle;
use crate::core::{Channel, ClientId, Origin};
use crate::listener::OriginListener;
use crate::store::GraphStore;
use crate::tree::InvalidationTree;

use clients::ClientState;
use subscriptions::Subscription;

/// Per-origin state, alive while the origin has subscriptions.
struct OriginState {
    tree: InvalidationTree,
    listener: JoinHandle<()>,
    /// `false` between a connection loss and the next reconnect
    available: bool,
    subscriptions: FxHashSet<Channel>,
}

pub(super) struct Manager<S, C> {
    rx: mpsc::UnboundedReceiver<ManagerMsg>,
    /// Handed to spawned tasks and listeners for reporting back.
    tx: mpsc::UnboundedSender<ManagerMsg>,
    store: Arc<S>,
    cache: Arc<C>,
    config: ConfigHandle,
    subscriptions: FxHashMap<Channel, Subscription>,
    origins: FxHashMap<Origin, OriginState>,
    clients: FxHashMap<ClientId, ClientState>,
    /// Marker and cache removal of destroyed subscriptions; a recreated
    /// subscription waits for it before recomputing.
    cleanups: FxHashMap<Channel, JoinHandle<()>>,
    next_generation: u64,
    stats: Stats,
}

impl<S: GraphStore, C: ResultCache> Manager<S, C> {
    pub(super) fn new(
        rx: mpsc::UnboundedReceiver<ManagerMsg>,
        tx: mpsc::UnboundedSender<ManagerMsg>,
        store: Arc<S>,
        cache: Arc<C>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            rx,
            tx,
            store,
            cache,
            config,
            subscriptions: FxHashMap::default(),
            origins: FxHashMap::default(),
            clients: FxHashMap::default(),
            cleanups: FxHashMap::default(),
            next_generation: 0,
            stats: Stats::default(),
        }
    }

    /// Run the actor event loop until shutdown.
    pub(super) async fn run(mut self) {
        let config = self.config.load();
        let mut sweep = interval(config.clients.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh = config.clients.full_refresh_interval().map(|period| {
            let mut refresh = interval_at(Instant::now() + period, period);
            refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
            refresh
        });
        drop(config);

        crate::debug!("manager"; "start");
        loop {
            tokio::select! {
                msg = self.rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let ControlFlow::Break(done) = self.handle(msg) {
                        self.stop();
                        let _ = done.send(());
                        return;
                    }
                }
                _ = sweep.tick() => self.sweep_clients(),
                _ = tick(&mut refresh) => self.full_refresh(),
            }
        }
        self.stop();
    }

    fn handle(&mut self, msg: ManagerMsg) -> ControlFlow<oneshot::Sender<()>> {
        match msg {
            ManagerMsg::Subscribe {
                client,
                query,
                reply,
            } => {
                let _ = reply.send(self.subscribe(client, *query));
            }

            ManagerMsg::SubscribeSchema {
                client,
                origin,
                reply,
            } => {
                let _ = reply.send(self.subscribe_schema(client, origin));
            }

            ManagerMsg::Unsubscribe {
                client,
                channel,
                reply,
            } => {
                let _ = reply.send(self.unsubscribe(&client, channel));
            }

            ManagerMsg::Heartbeat { client } => self.heartbeat(client),

            ManagerMsg::Stats { reply } => {
                let _ = reply.send(self.stats());
            }

            ManagerMsg::Shutdown { done } => return ControlFlow::Break(done),

            ManagerMsg::Origin { origin, event } => self.on_origin_event(origin, event),

            ManagerMsg::Recomputed {
                channel,
                generation,
                outcome,
            } => self.on_recomputed(channel, generation, outcome),

            ManagerMsg::Confirmed { channels } => self.on_confirmed(channels),

            ManagerMsg::Rerun {
                channel,
                generation,
            } => self.on_rerun(channel, generation),

            ManagerMsg::Resync { origin } => self.on_resync(&origin),
        }
        ControlFlow::Continue(())
    }

    /// Start tracking `origin`, spawning its listener.
    fn ensure_origin(&mut self, origin: &Origin) -> &mut OriginState {
        let (store, config, tx) = (&self.store, &self.config, &self.tx);
        self.origins.entry(origin.clone()).or_insert_with(|| {
            crate::debug!("manager"; "starting listener for {}", origin);
            let listener =
                OriginListener::new(origin.clone(), Arc::clone(store), config.clone(), tx.clone())
                    .spawn();
            OriginState {
                tree: InvalidationTree::new(),
                listener,
                available: true,
                subscriptions: FxHashSet::default(),
            }
        })
    }

    fn stats(&self) -> Stats {
        Stats {
            subscriptions: self.subscriptions.len(),
            clients: self.clients.len(),
            origins: self.origins.len(),
            unavailable: self.origins.values().filter(|o| !o.available).count(),
            tree_nodes: self.origins.values().map(|o| o.tree.node_count()).sum(),
            ..self.stats.clone()
        }
    }

    /// Periodic recompute of everything, catching changes missed during
    /// connection gaps.
    fn full_refresh(&mut self) {
        let channels: Vec<_> = self.subscriptions.keys().copied().collect();
        crate::debug!("manager"; "full refresh of {} subscriptions", channels.len());
        for channel in channels {
            self.trigger(channel);
        }
    }

    fn stop(&mut self) {
        for (_, origin) in self.origins.drain() {
            origin.listener.abort();
        }
        crate::debug!("manager"; "stopped");
    }
}

/// Tick an optional interval; pends forever when disabled.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
