//! Test data builders for creating test pipelines

use stagepipe_rs::pipeline::{
    range_source, Collector, Pipeline, PipelineResult, Stage, StageId, Supervisor,
};
use stagepipe_rs::EngineConfig;

type Step = Box<dyn FnOnce(&mut Pipeline, &stagepipe_rs::Channel<i64>, &stagepipe_rs::Channel<i64>) -> PipelineResult<StageId>>;

/// Builder for linear `source → transforms… → collector` pipelines over i64
pub struct LinearPipelineBuilder {
    items: Vec<i64>,
    capacity: usize,
    steps: Vec<Step>,
}

impl LinearPipelineBuilder {
    pub fn new() -> Self {
        Self {
            items: (0..10).collect(),
            capacity: 4,
            steps: Vec::new(),
        }
    }

    pub fn items(mut self, items: impl IntoIterator<Item = i64>) -> Self {
        self.items = items.into_iter().collect();
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Append a transform stage.
    pub fn then(mut self, stage: Stage<i64, i64>) -> Self {
        self.steps.push(Box::new(move |pipeline, input, output| {
            pipeline
                .add_stage(stage.input(input).output(output))
                .map(|r| r.id())
        }));
        self
    }

    /// Build the pipeline; returns it with the collector at its end.
    pub fn build(self) -> (Pipeline, Collector<i64>) {
        let config = EngineConfig {
            default_capacity: self.capacity,
            ..EngineConfig::default()
        };
        let mut pipeline = Pipeline::with_config(config);
        let collector = Collector::new();

        let mut current = pipeline.channel::<i64>();
        pipeline
            .add_stage(Stage::source("source", self.items).output(&current))
            .expect("add source");
        for step in self.steps {
            let next = pipeline.channel::<i64>();
            step(&mut pipeline, &current, &next).expect("add transform");
            current = next;
        }
        pipeline
            .add_stage(collector.stage("collector").input(&current))
            .expect("add collector");

        (pipeline, collector)
    }

    pub fn supervisor(self) -> (Supervisor, Collector<i64>) {
        let (pipeline, collector) = self.build();
        (Supervisor::new(pipeline), collector)
    }
}

impl Default for LinearPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Unbounded counting source, useful for cancellation tests.
pub fn endless_source(name: &str) -> Stage<(), i64> {
    Stage::source(name.to_string(), 0i64..)
}

/// Reference source `0..n`.
pub fn numbers(n: i64) -> Stage<(), i64> {
    range_source("numbers", 0..n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_builder() {
        let (pipeline, collector) = LinearPipelineBuilder::new()
            .items(0..3)
            .then(Stage::map("inc", |x: i64| x + 1))
            .build();

        assert_eq!(pipeline.stage_count(), 3);
        assert_eq!(pipeline.channel_count(), 2);
        assert!(collector.is_empty());
    }
}
