//! Waveform selector binary
//!
//! Subscribes to the waveforms topic and forwards only the records the
//! predicate keeps; the built-in predicate selects quiet records below
//! an amplitude threshold.
//!
//! Usage:
//!   cargo run --bin waveform_filter -- --threshold 50

use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use wavedaq::common::cli::SelectorArgs;
use wavedaq::filters::{
    run_waveform_filter, AmplitudeThreshold, SelectorSettings, WaveformFilter,
};

#[derive(Parser, Debug)]
#[command(name = "waveform_filter", about = "Amplitude selector on the waveform stream")]
struct Args {
    #[command(flatten)]
    selector: SelectorArgs,

    /// Maximum excursion above the baseline to keep a record
    #[arg(short = 't', long = "threshold", default_value_t = 50.0)]
    threshold: f64,

    /// Samples averaged at the record start for the baseline
    #[arg(long = "baseline-samples", default_value_t = 64)]
    baseline_samples: usize,
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

    let predicate = AmplitudeThreshold {
        threshold: args.threshold,
        baseline_samples: args.baseline_samples,
    };
    let filter = WaveformFilter::new(Box::new(predicate));

    let settings = SelectorSettings {
        input_address: args.selector.input_address.clone(),
        data_address: args.selector.data_address.clone(),
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(());
    });

    run_waveform_filter(settings, filter, shutdown_rx).await?;
    Ok(())
}
