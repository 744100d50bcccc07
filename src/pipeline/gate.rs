//! Per-subscription recompute gate.
//!
//! ```text
//!            trigger                      trigger
//!   Idle ─────────────▶ Processing ◀────────────────┐
//!    ▲                  │    │  (sets reprocess)    │
//!    │   complete       │    └──────────────────────┘
//!    └── (no reprocess) ┘
//!                       │ complete (reprocess set)
//!                       └──▶ Processing (flag cleared, rerun)
//! ```
//!
//! Any number of triggers while processing collapse into one rerun.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateState {
    #[default]
    Idle,
    Processing {
        reprocess: bool,
    },
}

/// What the caller should do after a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Gate was idle; start a recompute now.
    Start,
    /// A recompute is running; a rerun is now pending.
    Coalesced,
}

/// What the caller should do after a recompute finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Triggers arrived while processing; run once more.
    Rerun,
    Idle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecomputeGate {
    state: GateState,
}

impl RecomputeGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_processing(&self) -> bool {
        matches!(self.state, GateState::Processing { .. })
    }

    pub fn trigger(&mut self) -> Trigger {
        match self.state {
            GateState::Idle => {
                self.state = GateState::Processing { reprocess: false };
                Trigger::Start
            }
            GateState::Processing { .. } => {
                self.state = GateState::Processing { reprocess: true };
                Trigger::Coalesced
            }
        }
    }

    /// Finish the running recompute. On `Rerun` the gate stays processing.
    pub fn complete(&mut self) -> Completion {
        match self.state {
            GateState::Processing { reprocess: true } => {
                self.state = GateState::Processing { reprocess: false };
                Completion::Rerun
            }
            GateState::Processing { reprocess: false } | GateState::Idle => {
                self.state = GateState::Idle;
                Completion::Idle
            }
        }
    }
}
