//! Typed, capacity-configurable handoff queue between stages.
//!
//! Built on crossbeam channels. A `Channel<T>` is a registration handle: it
//! hands out exactly one producer endpoint and any number of consumer
//! endpoints. Closing the producer (explicitly or by dropping it) moves the
//! channel to `Closing`; consumers drain what is buffered and then observe
//! end-of-stream.
//!
//! ```text
//! Channel::bounded(4)
//!   ├── sender()   ──► ChannelSender   (one per channel)
//!   └── receiver() ──► ChannelReceiver (cloneable, items delivered once)
//! ```
//!
//! The handle keeps template endpoints until it is sealed. The pipeline seals
//! every channel on start so a handle held by the caller never keeps a channel
//! open or connected.

use crate::pipeline::cancel::CancelToken;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::ChannelId;
use crate::pipeline::lock;
use crossbeam_channel::{
    bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observable lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    /// Accepting sends.
    Open,
    /// Producer closed; buffered items remain.
    Closing,
    /// Producer closed and the buffer is empty.
    Closed,
}


struct Shared<T> {
    id: ChannelId,
    capacity: Option<usize>,
    closed: AtomicBool,
    sender: Mutex<Option<Sender<T>>>,
    receiver: Mutex<Option<Receiver<T>>>,
}

impl<T> Shared<T> {
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Registration handle for a typed channel.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.shared.id)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Create a channel. `None` is unbounded, `Some(0)` is a rendezvous channel.
    pub fn new(capacity: Option<usize>) -> Self {
        let (tx, rx) = match capacity {
            Some(cap) => bounded(cap),
            None => unbounded(),
        };
        Self {
            shared: Arc::new(Shared {
                id: ChannelId::next(),
                capacity,
                closed: AtomicBool::new(false),
                sender: Mutex::new(Some(tx)),
                receiver: Mutex::new(Some(rx)),
            }),
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::new(Some(capacity))
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }

    /// Whether the producer endpoint has not been handed out yet.
    pub fn has_sender(&self) -> bool {
        lock(&self.shared.sender).is_some()
    }

    /// Take the single producer endpoint.
    pub fn sender(&self) -> PipelineResult<ChannelSender<T>> {
        let tx = lock(&self.shared.sender).take().ok_or_else(|| {
            PipelineError::InvalidEdge(format!(
                "producer endpoint of channel {} already taken",
                self.shared.id
            ))
        })?;
        Ok(ChannelSender {
            tx: Some(tx),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Create a consumer endpoint. Fails once the channel is sealed.
    pub fn receiver(&self) -> PipelineResult<ChannelReceiver<T>> {
        let guard = lock(&self.shared.receiver);
        let rx = guard.as_ref().ok_or_else(|| {
            PipelineError::InvalidEdge(format!("channel {} is sealed", self.shared.id))
        })?;
        Ok(ChannelReceiver {
            rx: rx.clone(),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Take the producer and one consumer for use outside a pipeline.
    ///
    /// Seals the channel: further consumers must be cloned from the returned
    /// receiver.
    pub fn split(self) -> PipelineResult<(ChannelSender<T>, ChannelReceiver<T>)> {
        let rx = self.receiver()?;
        let tx = self.sender()?;
        self.seal();
        Ok((tx, rx))
    }

    /// Drop the template endpoints.
    ///
    /// A producer endpoint that was never taken is closed here.
    pub fn seal(&self) {
        lock(&self.shared.receiver).take();
        if lock(&self.shared.sender).take().is_some() {
            self.shared.mark_closed();
        }
    }
}

/// The producer end of a channel.
pub struct ChannelSender<T> {
    tx: Option<Sender<T>>,
    shared: Arc<Shared<T>>,
}

impl<T> ChannelSender<T> {
    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    fn live(&self) -> PipelineResult<&Sender<T>> {
        self.tx
            .as_ref()
            .ok_or(PipelineError::ChannelClosed(self.shared.id))
    }

    /// Send an item, blocking while the channel is full.
    ///
    /// Fails with `ChannelClosed` after `close()`, and with `Disconnected`
    /// if every consumer endpoint has been dropped.
    pub fn send(&self, item: T) -> PipelineResult<()> {
        self.live()?
            .send(item)
            .map_err(|_| PipelineError::Disconnected(self.shared.id))
    }

    /// Like `send`, but gives up with `Cancelled` once `cancel` trips.
    pub fn send_or_cancel(&self, item: T, cancel: &CancelToken) -> PipelineResult<()> {
        let tx = self.live()?;
        match tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(PipelineError::Disconnected(self.shared.id)),
            Err(TrySendError::Full(item)) => {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                select! {
                    send(tx, item) -> res => {
                        res.map_err(|_| PipelineError::Disconnected(self.shared.id))
                    }
                    recv(cancel.signal()) -> _ => Err(PipelineError::Cancelled),
                }
            }
        }
    }

    /// Stop accepting items. Idempotent; buffered items stay deliverable.
    pub fn close(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.shared.mark_closed();
            drop(tx);
            tracing::trace!("Channel {} closed", self.shared.id);
        }
    }
}

impl<T> Drop for ChannelSender<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for ChannelSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A consumer end of a channel. Clones compete for items.
pub struct ChannelReceiver<T> {
    rx: Receiver<T>,
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ChannelReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> ChannelReceiver<T> {
    pub fn id(&self) -> ChannelId {
        self.shared.id
    }

    /// Block until an item arrives. `None` means end-of-stream.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// `recv` with an upper bound on the wait.
    pub fn recv_timeout(&self, timeout: Duration) -> PipelineResult<Option<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(PipelineError::ReceiveTimeout {
                after_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Non-blocking receive. `Disconnected` means end-of-stream.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    /// Blocking iterator that ends at end-of-stream.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.rx.iter()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn state(&self) -> ChannelState {
        if !self.shared.is_closed() {
            ChannelState::Open
        } else if self.rx.is_empty() {
            ChannelState::Closed
        } else {
            ChannelState::Closing
        }
    }

    pub(crate) fn inner(&self) -> &Receiver<T> {
        &self.rx
    }
}

impl<T> std::fmt::Debug for ChannelReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReceiver")
            .field("id", &self.shared.id)
            .field("buffered", &self.rx.len())
            .finish()
    }
}

/// Type-erased view of a channel, used by the pipeline graph.
pub(crate) trait ErasedChannel: Send {
    fn id(&self) -> ChannelId;
    fn capacity(&self) -> Option<usize>;
    fn seal(&self);
}

impl<T: Send + 'static> ErasedChannel for Channel<T> {
    fn id(&self) -> ChannelId {
        Channel::id(self)
    }

    fn capacity(&self) -> Option<usize> {
        Channel::capacity(self)
    }

    fn seal(&self) {
        Channel::seal(self)
    }
}
