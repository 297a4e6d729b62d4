//! Acquisition controller binary
//!
//! Usage:
//!   cargo run --bin acquisition -- -f config.json
//!   cargo run --bin acquisition -- -I              # identify boards and quit
//!   cargo run --bin acquisition -- -S tcp://*:7000 -D tcp://*:7001 -C tcp://*:7002

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wavedaq::acquisition::{Controller, ControllerSettings};
use wavedaq::common::cli::AcquisitionArgs;
use wavedaq::common::TerminationFlag;
use wavedaq::config::AcquisitionConfig;
use wavedaq::digitizer::SimBoardProvider;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AcquisitionArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("wavedaq={}", args.common.log_filter()).parse()?),
        )
        .init();

    // The board inventory comes from the configured cards; a real
    // vendor control unit would enumerate the crate instead
    let boards = match AcquisitionConfig::load(&args.config_file) {
        Ok(config) => config
            .cards
            .iter()
            .map(|card| {
                (
                    card.serial.clone(),
                    card.model.clone().unwrap_or_else(|| "FastDAQ".to_string()),
                )
            })
            .collect(),
        Err(_) => Vec::new(),
    };
    let provider = Box::new(SimBoardProvider::new(boards));

    let settings = ControllerSettings {
        status_address: args.common.status_address_or("tcp://*:16180"),
        data_address: args.data_address.clone(),
        commands_address: args.common.commands_address_or("tcp://*:16182"),
        config_file: args.config_file.clone(),
        base_period: Duration::from_millis(args.common.base_period_ms),
        verbosity: args.common.verbosity(),
        identify_only: args.identify_only,
    };

    let terminate = TerminationFlag::install();
    let mut controller = Controller::new(settings, provider, terminate);

    // The state machine is synchronous and single-threaded
    tokio::task::spawn_blocking(move || controller.run()).await??;

    Ok(())
}
