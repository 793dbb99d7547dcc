//! Concurrent streaming pipeline engine.
//!
//! Items flow through stages connected by typed, bounded channels. Every
//! stage runs on its own thread; the supervisor launches them, propagates
//! failure and cancellation, and aggregates their outcomes.
//!
//! # Architecture
//!
//! ```text
//! [Source] ──ch──► [Transform] ──ch──► [Transform] ──ch──► [Sink]
//!                      │
//!                      └──ch──► [Sink]
//! ```
//!
//! # Design
//!
//! - **Typed channels**: `Channel<T>` over crossbeam; one producer, any number
//!   of competing consumers, closure by dropping the producer.
//! - **Backpressure**: bounded channels block the producer when full.
//! - **Checked construction**: cycles are rejected when an edge is added;
//!   dangling channels and unreachable stages when the graph is validated.
//! - **Failure propagation**: a failed stage closes its outputs (downstream
//!   drains and stops) and the supervisor trips the cancellation signal
//!   (sources stop producing).
//! - **Structured results**: every stage reports; nothing aborts the process.

pub mod cancel;
pub mod channel;
pub mod compiled_plan;
pub mod compiler;
pub mod error;
pub mod events;
pub mod graph;
pub mod id;
pub mod stage;
pub mod stages;
pub mod supervisor;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use cancel::{CancelHandle, CancelReason, CancelToken};
pub use channel::{Channel, ChannelReceiver, ChannelSender, ChannelState};
pub use compiled_plan::{CompiledPlan, PlanStats};
pub use error::{
    Endpoint, PipelineError, PipelineResult, StageError, TransformError, TransformResult,
};
pub use events::SupervisorEvent;
pub use graph::{Edge, Pipeline, PipelineState};
pub use id::{ChannelId, StageId};
pub use stage::{
    FairnessPolicy, Filter, Stage, StageContext, StageKind, StageOutcome, StageRef, StageReport,
    StageStats,
};
pub use stages::{range_source, Collector, Offset, Scale};
pub use supervisor::{RunResult, Supervisor};

/// Lock `mutex`, taking the guard back if a panicking thread poisoned it.
///
/// Every mutex in the engine guards plain data that stays consistent across a
/// panic, so poisoning is not an error here.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_recovers_from_poisoning() {
        let mutex = Arc::new(Mutex::new(vec![1]));
        let poisoner = Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poisoned on purpose");
        })
        .join();

        assert!(mutex.is_poisoned());
        lock(&mutex).push(2);
        assert_eq!(*lock(&mutex), vec![1, 2]);
    }
}
