use anyhow::Result;
use clap::Parser;
use poker_peek::commands;
use poker_peek::config::{AppConfig, Cli};
use poker_peek::telemetry::Telemetry;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::try_from(cli)?;
    let telemetry = Telemetry::init(&config.log_filter)?;
    info!(
        target_host = %config.target_host,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        store_capacity = config.store_capacity,
        preferences = %config.preferences_path.display(),
        "starting poker-peek"
    );

    let result = commands::run(&config).await;
    if config.print_metrics {
        println!("{}", telemetry.render_metrics());
    }
    result
}
