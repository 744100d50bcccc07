//! Livequery - live-query invalidation and delta propagation.
//!
//! Clients subscribe to declarative queries over a hierarchical graph store.
//! Each subscription records what it read; store change events are routed
//! through an invalidation tree to exactly the affected subscriptions, which
//! recompute and publish a structural patch against their previous result.
//!
//! ```text
//! GraphStore ──events──▶ listener ──batch──▶ actor::Manager ──▶ tree lookup
//!                                                 │
//!                                   pipeline::recompute ──▶ diff ──▶ ResultCache
//! ```
//!
//! Start with [`actor::Coordinator`].

pub mod actor;
pub mod cache;
pub mod config;
pub mod core;
pub mod diff;
pub mod listener;
pub mod logger;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod tree;

pub use actor::{Coordinator, LiveQueryError, LiveQueryHandle, Stats};
pub use config::{ConfigHandle, LiveConfig};
