//! Recompute pipeline.
//!
//! - `gate` - per-subscription `Idle`/`Processing` state machine that keeps
//!   at most one recompute in flight and collapses triggers into one rerun
//! - `recompute` - one attempt: execute, version, diff, persist, publish
//!
//! The gate lives in the manager's subscription table; attempts run in
//! spawned tasks and report an [`Outcome`] back to the manager.

mod gate;
mod recompute;

pub use gate::{Completion, GateState, RecomputeGate, Trigger};
pub use recompute::{
    ERROR_FIELD, Job, JobKind, Markers, Outcome, RecomputeContext, Recomputed, TreeUpdate,
    recompute,
};
pub(crate) use recompute::register_markers;
