//! Actor Message Definitions
//!
//! Everything the manager reacts to arrives through one inbox:
//!
//! ```text
//! LiveQueryHandle --Subscribe/Unsubscribe/Heartbeat--> Manager
//! OriginListener  --Origin { Batch | Disconnected | Reconnected }--> Manager
//! spawned tasks   --Recomputed/Confirmed/Rerun/Resync--> Manager
//! ```

use serde::Serialize;
use tokio::sync::oneshot;

use super::LiveQueryError;
use crate::core::{Channel, ClientId, Origin};
use crate::listener::OriginEvent;
use crate::pipeline::Outcome;
use crate::query::Query;

/// Counters reported by [`LiveQueryHandle::stats`](super::LiveQueryHandle::stats).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub subscriptions: usize,
    pub clients: usize,
    pub origins: usize,
    /// Origins whose listener is between connection loss and reconnect.
    pub unavailable: usize,
    /// Nodes across all invalidation trees.
    pub tree_nodes: usize,
    pub recomputes: u64,
    pub publishes: u64,
    pub unchanged: u64,
    /// Triggers absorbed by an in-flight recompute.
    pub coalesced: u64,
    pub timeouts: u64,
    pub failures: u64,
}

#[derive(Debug)]
pub enum ManagerMsg {
    // =========================================================================
    // Client API
    // =========================================================================
    Subscribe {
        client: ClientId,
        /// Boxed to keep the message small
        query: Box<Query>,
        reply: oneshot::Sender<Result<Channel, LiveQueryError>>,
    },
    SubscribeSchema {
        client: ClientId,
        origin: Origin,
        reply: oneshot::Sender<Channel>,
    },
    Unsubscribe {
        client: ClientId,
        channel: Channel,
        reply: oneshot::Sender<bool>,
    },
    Heartbeat {
        client: ClientId,
    },
    Stats {
        reply: oneshot::Sender<Stats>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },

    // =========================================================================
    // Listeners
    // =========================================================================
    Origin {
        origin: Origin,
        event: OriginEvent,
    },

    // =========================================================================
    // Spawned tasks reporting back
    // =========================================================================
    Recomputed {
        channel: Channel,
        generation: u64,
        outcome: Outcome,
    },
    /// Containment candidates confirmed as affected.
    Confirmed {
        channels: Vec<Channel>,
    },
    /// Reprocess delay of a coalesced rerun elapsed.
    Rerun {
        channel: Channel,
        generation: u64,
    },
    /// Markers of a reconnected origin were resent.
    Resync {
        origin: Origin,
    },
}
