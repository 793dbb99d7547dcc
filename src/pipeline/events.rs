//! Lifecycle notifications published by the supervisor.
//!
//! Delivered over an unbounded crossbeam channel; see `Supervisor::events()`.

use crate::pipeline::cancel::CancelReason;
use crate::pipeline::graph::PipelineState;
use crate::pipeline::id::StageId;
use crate::pipeline::stage::StageOutcome;
use serde::{Deserialize, Serialize};

/// Messages sent from stage workers and the monitor thread to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorEvent {
    /// A stage's worker thread began executing.
    StageStarted { stage: StageId, name: String },

    /// A stage reported its terminal outcome.
    StageFinished {
        stage: StageId,
        name: String,
        outcome: StageOutcome,
    },

    /// The cancellation signal tripped.
    CancelRequested { reason: Option<CancelReason> },

    /// Every worker has been joined.
    Finished { state: PipelineState },
}

impl SupervisorEvent {
    /// Stage this event concerns, if any.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            SupervisorEvent::StageStarted { stage, .. }
            | SupervisorEvent::StageFinished { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, SupervisorEvent::Finished { .. })
    }
}
