use rustc_hash::FxHashSet;
use tokio::time::Instant;

use super::Manager;
use crate::cache::ResultCache;
use crate::core::{Channel, ClientId};
use crate::log;
use crate::store::GraphStore;

pub(super) struct ClientState {
    last_seen: Instant,
    pub(super) channels: FxHashSet<Channel>,
}

impl ClientState {
    fn new() -> Self {
        Self {
            last_seen: Instant::now(),
            channels: FxHashSet::default(),
        }
    }
}

impl<S: GraphStore, C: ResultCache> Manager<S, C> {
    /// Registry entry of `client`, refreshed as if it just sent a heartbeat.
    pub(super) fn client_mut(&mut self, client: &ClientId) -> &mut ClientState {
        let state = self
            .clients
            .entry(client.clone())
            .or_insert_with(ClientState::new);
        state.last_seen = Instant::now();
        state
    }

    pub(super) fn heartbeat(&mut self, client: ClientId) {
        self.client_mut(&client);
    }

    /// Drop clients silent for longer than the heartbeat timeout, releasing
    /// their subscriptions.
    pub(super) fn sweep_clients(&mut self) {
        let timeout = self.config.load().clients.heartbeat_timeout();
        let stale: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, state)| state.last_seen.elapsed() > timeout)
            .map(|(client, _)| client.clone())
            .collect();

        for client in stale {
            let Some(state) = self.clients.remove(&client) else {
                continue;
            };
            log!("clients"; "dropping {} after {:?} without heartbeat", client, timeout);
            for channel in state.channels {
                self.release(&client, channel);
            }
        }
    }
}
