//! PSD polygon selector binary
//!
//! Subscribes to the events topic and forwards only the events whose
//! `(energy, PSD)` point falls inside the configured polygon.
//!
//! Usage:
//!   cargo run --bin psd_filter -- polygon.json
//!   cargo run --bin psd_filter -- -A tcp://127.0.0.1:16185 -D tcp://*:16187 polygon.json

use clap::Parser;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wavedaq::common::cli::SelectorArgs;
use wavedaq::filters::{run_psd_filter, PsdFilter, SelectorSettings};

#[derive(Parser, Debug)]
#[command(name = "psd_filter", about = "Event selector on the (energy, PSD) plane")]
struct Args {
    #[command(flatten)]
    selector: SelectorArgs,

    /// JSON file with the selection polygon: an array of {x, y} points
    polygon_file: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("wavedaq={}", args.selector.common.log_filter()).parse()?),
        )
        .init();

    let filter = PsdFilter::from_file(&args.polygon_file)?;
    info!(polygon = %args.polygon_file, "Selection polygon loaded");

    let settings = SelectorSettings {
        input_address: args.selector.input_address.clone(),
        data_address: args.selector.data_address.clone(),
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    run_psd_filter(settings, filter, shutdown_rx).await?;
    Ok(())
}
