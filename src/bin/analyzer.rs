//! Waveform analyzer binary
//!
//! Usage:
//!   cargo run --bin analyzer -- -f waan_config.json
//!   cargo run --bin analyzer -- -A tcp://127.0.0.1:16181 -D tcp://*:16185

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wavedaq::analyzer::{Analyzer, AnalyzerSettings};
use wavedaq::common::cli::AnalyzerArgs;
use wavedaq::common::TerminationFlag;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AnalyzerArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("wavedaq={}", args.common.log_filter()).parse()?),
        )
        .init();

    let settings = AnalyzerSettings {
        status_address: args.common.status_address_or("tcp://*:16184"),
        commands_address: args.common.commands_address_or("tcp://*:16186"),
        input_address: args.input_address.clone(),
        data_address: args.data_address.clone(),
        config_file: args.config_file.clone(),
        base_period: Duration::from_millis(args.common.base_period_ms),
        verbosity: args.common.verbosity(),
    };

    let terminate = TerminationFlag::install();
    let mut analyzer = Analyzer::new(settings, terminate);

    tokio::task::spawn_blocking(move || analyzer.run()).await??;

    Ok(())
}
