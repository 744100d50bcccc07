//! Actor System for Live Queries
//!
//! Message-passing concurrency around a single manager:
//!
//! ```text
//!                 ┌──────────────── LiveQueryHandle (subscribe, heartbeat, ...)
//!                 ▼
//! OriginListener ──▶ Manager ──spawn──▶ recompute ──▶ ResultCache (store + publish)
//!  (per origin)      (tables)  ◀──────── Outcome
//! ```
//!
//! # Module Structure
//!
//! - `messages` - Message types for the manager inbox
//! - `manager` - Owns subscriptions, invalidation trees and clients
//! - `coordinator` - Wires up the manager and hands out the handle

mod coordinator;
mod manager;
mod messages;


use thiserror::Error;

use crate::query::QueryError;

pub use coordinator::{Coordinator, LiveQueryHandle};
pub use messages::{ManagerMsg, Stats};

#[derive(Debug, Error)]
pub enum LiveQueryError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("live query manager stopped")]
    Stopped,
}
