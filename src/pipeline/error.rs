//! Pipeline-specific error types.

use crate::pipeline::id::{ChannelId, StageId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error raised by a stage's transformation logic.
///
/// Local to the stage that raised it: the stage stops, the offending item is
/// not forwarded, and the supervisor records the failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message}")]
pub struct TransformError {
    message: String,
}

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for TransformError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for TransformError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

pub type TransformResult<T> = std::result::Result<T, TransformError>;

/// Why a single stage failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageError {
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Send on closed channel {0}")]
    ChannelClosed(ChannelId),

    #[error("No input received within {after_ms} ms")]
    ReceiveTimeout { after_ms: u64 },

    #[error("Stage panicked: {0}")]
    Panicked(String),
}

/// Which end of a channel is missing during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endpoint {
    Producer,
    Consumer,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Producer => write!(f, "producer"),
            Endpoint::Consumer => write!(f, "consumer"),
        }
    }
}

/// Errors that can occur within the pipeline system.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Cycle detected in pipeline graph (edge {from} -> {to})")]
    CycleDetected { from: StageId, to: StageId },

    #[error("Channel {channel} has no {missing}")]
    DanglingChannel { channel: ChannelId, missing: Endpoint },

    #[error("Stage {stage} ('{name}') is not reachable from any source")]
    UnreachableStage { stage: StageId, name: String },

    #[error("Pipeline has no stages")]
    EmptyPipeline,

    #[error("Invalid edge: {0}")]
    InvalidEdge(String),

    #[error("Port mismatch: {0}")]
    PortMismatch(String),

    #[error("Channel {0} is closed")]
    ChannelClosed(ChannelId),

    #[error("Channel {0} has no remaining consumers")]
    Disconnected(ChannelId),

    #[error("Receive timed out after {after_ms} ms")]
    ReceiveTimeout { after_ms: u64 },

    #[error("Pipeline was cancelled")]
    Cancelled,

    #[error("Stage {stage} ('{name}') failed: {source}")]
    StageFailed {
        stage: StageId,
        name: String,
        #[source]
        source: StageError,
    },

    #[error("Pipeline already started")]
    AlreadyStarted,

    #[error("Pipeline not started")]
    NotStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Supervisor error: {0}")]
    Supervisor(String),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
