//! Collecting sink and counting source.

use crate::pipeline::lock;
use crate::pipeline::stage::Stage;
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// Sink target that keeps every item it receives, in arrival order.
///
/// Clones share the same buffer, so one clone can be turned into a stage while
/// another reads the results after the run.
#[derive(Debug)]
pub struct Collector<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Send + 'static> Collector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink stage appending into this collector.
    pub fn stage(&self, name: impl Into<String>) -> Stage<T, ()> {
        let items = Arc::clone(&self.items);
        Stage::for_each(name, move |item| lock(&items).push(item))
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// Drain everything collected so far.
    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.items))
    }
}

impl<T: Clone + Send + 'static> Collector<T> {
    /// Copy of everything collected so far.
    pub fn items(&self) -> Vec<T> {
        lock(&self.items).clone()
    }
}


/// Source stage emitting `range` in ascending order.
pub fn range_source(name: impl Into<String>, range: Range<i64>) -> Stage<(), i64> {
    Stage::source(name, range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::channel::Channel;
    use crate::pipeline::{Pipeline, Supervisor};

    #[test]
    fn test_collector_gathers_in_order() {
        let mut pipeline = Pipeline::new();
        let ch = Channel::bounded(1);
        let collector = Collector::new();
        pipeline.add_stage(range_source("numbers", 0..20).output(&ch)).unwrap();
        pipeline.add_stage(collector.stage("collect").input(&ch)).unwrap();

        let result = Supervisor::new(pipeline).run().unwrap();
        assert!(result.is_completed());
        assert_eq!(collector.len(), 20);
        assert_eq!(collector.take(), (0..20).collect::<Vec<_>>());
        assert!(collector.is_empty());
    }
}
