//! StagePipe demo - Main Entry Point
//!
//! Runs the reference pipeline `range → double → add one → print` using the
//! configuration file given as the first argument, or defaults.

use anyhow::Context;
use stagepipe_rs::{
    config::AppConfig,
    pipeline::{range_source, Offset, Pipeline, Scale, Stage, Supervisor},
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let config = match &config_path {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => AppConfig::default(),
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting StagePipe demo");
    if let Some(path) = &config_path {
        tracing::info!("Using config {}", path);
    }

    let mut pipeline = Pipeline::with_config(config.engine.clone());
    let numbers = pipeline.channel();
    let doubled = pipeline.channel();
    let shifted = pipeline.channel();
    let delay = Duration::from_millis(config.demo.sink_delay_ms);

    pipeline.add_stage(range_source("range", 0..config.demo.item_count).output(&numbers))?;
    pipeline.add_stage(
        Stage::from_filter(Scale::double())
            .input(&numbers)
            .output(&doubled),
    )?;
    pipeline.add_stage(
        Stage::from_filter(Offset::increment())
            .input(&doubled)
            .output(&shifted),
    )?;
    pipeline.add_stage(
        Stage::for_each("print", move |value: i64| {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            println!("{}", value);
        })
        .input(&shifted),
    )?;

    let mut supervisor = Supervisor::new(pipeline);
    let result = supervisor.run().context("running pipeline")?;
    for report in &result.stages {
        tracing::info!(
            "{} '{}': {:?} (in {}, out {}, {:?})",
            report.id,
            report.name,
            report.outcome,
            report.stats.received,
            report.stats.emitted,
            report.stats.elapsed
        );
    }

    if !result.is_completed() {
        let state = result.state;
        result
            .into_result()
            .with_context(|| format!("pipeline finished as {:?}", state))?;
    }

    Ok(())
}
