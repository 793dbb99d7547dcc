//! Built-in stage implementations.

pub mod arithmetic;
pub mod collect;

pub use arithmetic::{Offset, Scale};
pub use collect::{range_source, Collector};
