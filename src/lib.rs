//! # StagePipe-RS: Concurrent Streaming Pipelines
//!
//! Build a directed acyclic graph of processing stages connected by typed,
//! bounded channels, then run every stage on its own thread under a
//! supervisor that propagates failure and cancellation and reports one
//! aggregated result.
//!
//! ## Architecture
//!
//! - **Channels**: crossbeam-backed FIFO queues with explicit close and
//!   end-of-stream semantics
//! - **Stages**: sources, transforms and sinks, each a single transformation
//! - **Pipeline**: graph construction with cycle, dangling-channel and
//!   reachability checks
//! - **Supervisor**: one worker thread per stage plus a monitor thread
//!
//! ## Example
//!
//! ```no_run
//! use stagepipe_rs::pipeline::{range_source, Collector, Offset, Pipeline, Scale, Stage, Supervisor};
//!
//! # fn main() -> stagepipe_rs::Result<()> {
//! let mut pipeline = Pipeline::new();
//! let numbers = pipeline.channel();
//! let doubled = pipeline.channel();
//! let shifted = pipeline.channel();
//! let results = Collector::new();
//!
//! pipeline.add_stage(range_source("numbers", 0..10).output(&numbers))?;
//! pipeline.add_stage(Stage::from_filter(Scale::double()).input(&numbers).output(&doubled))?;
//! pipeline.add_stage(Stage::from_filter(Offset::increment()).input(&doubled).output(&shifted))?;
//! pipeline.add_stage(results.stage("collect").input(&shifted))?;
//!
//! let result = Supervisor::new(pipeline).run()?;
//! assert!(result.is_completed());
//! assert_eq!(results.items(), vec![1, 3, 5, 7, 9, 11, 13, 15, 17, 19]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;

// Re-export commonly used types
pub use config::{AppConfig, DemoSettings, EngineConfig};
pub use error::{Result, ResultExt, StagePipeError};
pub use pipeline::{
    Channel, Pipeline, PipelineError, PipelineState, RunResult, Stage, Supervisor,
};
