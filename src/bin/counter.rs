//! Offline event counter
//!
//! Prints the per-channel totals of an `.ade` file.
//!
//! Usage:
//!   cargo run --bin counter -- run.ade

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wavedaq::common::cli::FileToolArgs;
use wavedaq::filters::offline::count_events;

fn main() -> anyhow::Result<()> {
    let args = FileToolArgs::parse();

    let directive = if args.verbose { "wavedaq=debug" } else { "wavedaq=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let counts = count_events(&args.input_file)?;

    println!("{}: {} events", args.input_file, counts.total);
    for (channel, count) in &counts.per_channel {
        println!("  channel {channel}: {count}");
    }
    Ok(())
}
