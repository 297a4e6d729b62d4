//! Offline event-file sorter
//!
//! Sorts an `.ade` file by timestamp, in place.
//!
//! Usage:
//!   cargo run --bin sorter -- run.ade

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wavedaq::common::cli::FileToolArgs;
use wavedaq::filters::offline::sort_events_file;

fn main() -> anyhow::Result<()> {
    let args = FileToolArgs::parse();

    let directive = if args.verbose { "wavedaq=debug" } else { "wavedaq=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let moved = sort_events_file(&args.input_file)?;
    println!("{}: sorted, {} events moved", args.input_file, moved);
    Ok(())
}
