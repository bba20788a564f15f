//! Platter scenario runner
//!
//! Loads a cart scenario from `fixtures/scenarios/`, builds each cart through
//! the aggregation service, checks it out and prints the summary.
//!
//! Use `-s` to pick a scenario by name
//! Use `-c` (or `PLATTER_CONFIG`) to load an engine config file

use std::{io, io::Write, time::Instant};

use anyhow::Result;
use clap::Parser;
use humanize_duration::{Truncate, prelude::DurationExt};
use tracing::info;

use platter::{
    config::EngineConfig,
    fixtures::Fixture,
    utils::{ScenarioArgs, init_tracing},
};

#[tokio::main]
async fn main() -> Result<()> {
    _ = dotenvy::dotenv();

    let args = ScenarioArgs::parse();

    init_tracing(&args.log_level, args.log_format);

    let config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };

    let scenario = Fixture::with_base_path(&args.fixtures).scenario(&args.scenario)?;
    let service = scenario.service(config)?;

    info!(scenario = %args.scenario, carts = scenario.carts.len(), "running scenario");

    let start = Instant::now();
    let summaries = scenario.run(&service).await?;
    let elapsed = start.elapsed();

    let stdout = io::stdout();
    let mut handle = stdout.lock();

    for summary in &summaries {
        writeln!(handle, " {}", summary.snapshot.session.user)?;
        summary.write_to(&mut handle)?;
    }

    writeln!(
        handle,
        " {} ({}s)",
        elapsed.human(Truncate::Nano),
        elapsed.as_secs_f32()
    )?;

    Ok(())
}
