//! Offline timestamp-window filter
//!
//! Copies the events with `tmin <= timestamp < tmax` into a new `.ade`
//! file.
//!
//! Usage:
//!   cargo run --bin time_filter -- run.ade window.ade 1000000 2000000

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wavedaq::filters::offline::filter_by_time;

#[derive(Parser, Debug)]
#[command(name = "time_filter", about = "Select events inside a timestamp window")]
struct Args {
    /// Input event file (.ade)
    input_file: String,

    /// Output event file (.ade)
    output_file: String,

    /// Window start (included)
    tmin: u64,

    /// Window end (excluded)
    tmax: u64,

    /// Verbose execution
    #[arg(short = 'v')]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let directive = if args.verbose { "wavedaq=debug" } else { "wavedaq=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let kept = filter_by_time(&args.input_file, &args.output_file, args.tmin, args.tmax)?;
    println!(
        "{} -> {}: {} events in [{}, {})",
        args.input_file, args.output_file, kept, args.tmin, args.tmax
    );
    Ok(())
}
