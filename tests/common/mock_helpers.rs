//! Mock stages and filters for failure and timing tests

use stagepipe_rs::pipeline::{Filter, Stage, TransformError, TransformResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Passes items through until it sees `fail_on`, then fails.
#[derive(Debug, Clone)]
pub struct FailAt {
    name: String,
    fail_on: i64,
}

impl FailAt {
    pub fn new(fail_on: i64) -> Self {
        Self {
            name: format!("fail-at-{}", fail_on),
            fail_on,
        }
    }
}

impl Filter for FailAt {
    type Input = i64;
    type Output = i64;

    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, item: i64, out: &mut Vec<i64>) -> TransformResult<()> {
        if item == self.fail_on {
            return Err(TransformError::new(format!("refusing item {}", item)));
        }
        out.push(item);
        Ok(())
    }
}

/// Identity transform that sleeps before forwarding each item.
pub fn slow_identity(name: &str, delay: Duration) -> Stage<i64, i64> {
    Stage::map(name.to_string(), move |x: i64| {
        std::thread::sleep(delay);
        x
    })
}

/// Shared counter readable while a pipeline runs
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Identity transform that counts what it forwards.
    pub fn tap(&self, name: &str) -> Stage<i64, i64> {
        let count = Arc::clone(&self.0);
        Stage::map(name.to_string(), move |x: i64| {
            count.fetch_add(1, Ordering::SeqCst);
            x
        })
    }

    /// Sink that counts and optionally sleeps per item.
    pub fn sink(&self, name: &str, delay: Duration) -> Stage<i64, ()> {
        let count = Arc::clone(&self.0);
        Stage::for_each(name.to_string(), move |_: i64| {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            count.fetch_add(1, Ordering::SeqCst);
        })
    }
}
