//! Integer arithmetic filters.
//!
//! Both filters use checked arithmetic: an overflow fails the stage instead of
//! wrapping silently.

use crate::pipeline::error::{TransformError, TransformResult};
use crate::pipeline::stage::Filter;

/// Multiplies every item by a constant factor.
#[derive(Debug, Clone)]
pub struct Scale {
    name: String,
    factor: i64,
}

impl Scale {
    pub fn new(factor: i64) -> Self {
        Self {
            name: format!("Scale(x{})", factor),
            factor,
        }
    }

    /// `x -> 2x`
    pub fn double() -> Self {
        Self::new(2).named("Double")
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn factor(&self) -> i64 {
        self.factor
    }
}

impl Filter for Scale {
    type Input = i64;
    type Output = i64;

    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, item: i64, out: &mut Vec<i64>) -> TransformResult<()> {
        let scaled = item.checked_mul(self.factor).ok_or_else(|| {
            TransformError::new(format!("{} * {} overflows i64", item, self.factor))
        })?;
        out.push(scaled);
        Ok(())
    }
}

/// Adds a constant to every item.
#[derive(Debug, Clone)]
pub struct Offset {
    name: String,
    delta: i64,
}

impl Offset {
    pub fn new(delta: i64) -> Self {
        Self {
            name: format!("Offset({:+})", delta),
            delta,
        }
    }

    /// `x -> x + 1`
    pub fn increment() -> Self {
        Self::new(1).named("AddOne")
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn delta(&self) -> i64 {
        self.delta
    }
}

impl Filter for Offset {
    type Input = i64;
    type Output = i64;

    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self, item: i64, out: &mut Vec<i64>) -> TransformResult<()> {
        let shifted = item.checked_add(self.delta).ok_or_else(|| {
            TransformError::new(format!("{} + {} overflows i64", item, self.delta))
        })?;
        out.push(shifted);
        Ok(())
    }
}
