//! Actor Coordinator - Wires up the Live Query Actor System
//!
//! The Coordinator is a thin orchestrator that:
//! - Validates the configuration
//! - Creates the manager inbox
//! - Spawns the manager and returns a [`LiveQueryHandle`]
//!
//! Listeners are started by the manager on demand, one per origin.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};

use super::LiveQueryError;
use super::manager::Manager;
use super::messages::{ManagerMsg, Stats};
use crate::cache::ResultCache;
use crate::config::ConfigHandle;
use crate::core::{Channel, ClientId, Origin};
use crate::query::Query;
use crate::store::GraphStore;

/// Coordinator - wires up and runs the actor system.
pub struct Coordinator<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    config: ConfigHandle,
}

impl<S: GraphStore, C: ResultCache> Coordinator<S, C> {
    pub fn new(store: Arc<S>, cache: Arc<C>) -> Self {
        Self {
            store,
            cache,
            config: ConfigHandle::default(),
        }
    }

    /// Use `config`; reloads through the handle reach the running system.
    pub fn with_config(mut self, config: ConfigHandle) -> Self {
        self.config = config;
        self
    }

    /// Start the manager on the current tokio runtime.
    pub fn start(self) -> Result<LiveQueryHandle> {
        self.config
            .load()
            .validate()
            .context("refusing to start with invalid configuration")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Manager::new(rx, tx.clone(), self.store, self.cache, self.config.clone());
        tokio::spawn(manager.run());

        Ok(LiveQueryHandle {
            tx,
            config: self.config,
        })
    }
}

/// Embedding API of a running live-query system. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LiveQueryHandle {
    tx: mpsc::UnboundedSender<ManagerMsg>,
    config: ConfigHandle,
}

impl LiveQueryHandle {
    /// Subscribe `client` to `query`. Subscribing to an existing query
    /// shares its subscription; the returned channel identifies it.
    pub async fn subscribe(
        &self,
        client: impl Into<ClientId>,
        query: Query,
    ) -> Result<Channel, LiveQueryError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::Subscribe {
            client: client.into(),
            query: Box::new(query),
            reply,
        })?;
        rx.await.map_err(|_| LiveQueryError::Stopped)?
    }

    /// Subscribe `client` to the schema of `origin`.
    pub async fn subscribe_schema(
        &self,
        client: impl Into<ClientId>,
        origin: impl Into<Origin>,
    ) -> Result<Channel, LiveQueryError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::SubscribeSchema {
            client: client.into(),
            origin: origin.into(),
            reply,
        })?;
        rx.await.map_err(|_| LiveQueryError::Stopped)
    }

    /// Returns whether the client held the subscription.
    pub async fn unsubscribe(
        &self,
        client: impl Into<ClientId>,
        channel: Channel,
    ) -> Result<bool, LiveQueryError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::Unsubscribe {
            client: client.into(),
            channel,
            reply,
        })?;
        rx.await.map_err(|_| LiveQueryError::Stopped)
    }

    pub fn heartbeat(&self, client: impl Into<ClientId>) -> Result<(), LiveQueryError> {
        self.send(ManagerMsg::Heartbeat {
            client: client.into(),
        })
    }

    pub async fn stats(&self) -> Result<Stats, LiveQueryError> {
        let (reply, rx) = oneshot::channel();
        self.send(ManagerMsg::Stats { reply })?;
        rx.await.map_err(|_| LiveQueryError::Stopped)
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Stop the manager and every listener.
    pub async fn shutdown(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(ManagerMsg::Shutdown { done })
            .context("live query manager already stopped")?;
        rx.await
            .context("live query manager exited before confirming shutdown")?;
        crate::debug!("actor"; "stopped");
        Ok(())
    }

    fn send(&self, msg: ManagerMsg) -> Result<(), LiveQueryError> {
        self.tx.send(msg).map_err(|_| LiveQueryError::Stopped)
    }
}
