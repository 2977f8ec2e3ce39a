//! Binary entry point: parse the CLI, layer it over an optional TOML config
//! file, run one simulated STRATOS network for the configured duration, and
//! report the aggregated [`stratos_results::Summary`] — following the
//! teacher's own daemon's parse-config-then-run-then-report shape.

mod cli;
mod config;
mod harness;

use clap::Parser;
use cli::Cli;
use config::SimConfig;
use harness::Harness;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    config.apply_overrides(&cli);

    tracing::info!(?config, "starting simulation run");

    let harness = Harness::new(config.clone());
    let summary = harness.run().await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    if let Some(distance) = summary.mean_response_distance() {
        println!("mean response distance: {distance:.2}");
    }

    if let Some(path) = &cli.export {
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)?;
        tracing::info!(path = %path.display(), "summary exported");
    }

    Ok(())
}
