//! Cooperative cancellation signal.
//!
//! The signal is a zero-capacity channel whose only sender is dropped when the
//! token trips. A disconnected receiver is always ready, so stages can wait on
//! it inside the same `select!` as their channel operations instead of
//! polling a flag.

use crate::pipeline::id::StageId;
use crate::pipeline::lock;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Why cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// An external caller asked for early termination.
    Requested,
    /// A stage failed and sources must stop producing.
    StageFailed(StageId),
}

struct CancelInner {
    tripped: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

/// Shared, cloneable cancellation token.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                tripped: AtomicBool::new(false),
                reason: Mutex::new(None),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Trip the token. Only the first reason is kept; later calls are no-ops.
    ///
    /// Returns `true` if this call tripped the token.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        {
            let mut slot = lock(&self.inner.reason);
            if slot.is_some() {
                return false;
            }
            *slot = Some(reason);
        }
        self.inner.tripped.store(true, Ordering::Release);
        lock(&self.inner.trigger).take();
        true
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.tripped.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *lock(&self.inner.reason)
    }

    /// Receiver that becomes ready (disconnected) once the token trips.
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

/// Caller-facing handle that can only request cancellation.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancelToken,
}

impl CancelHandle {
    pub(crate) fn new(token: CancelToken) -> Self {
        Self { token }
    }

    /// Ask every source stage to stop producing.
    pub fn cancel(&self) {
        if self.token.cancel(CancelReason::Requested) {
            tracing::info!("Pipeline cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
