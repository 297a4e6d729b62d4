//! Offline ASCII exporter
//!
//! Dumps an `.ade` file as tab-separated text on stdout, one event per
//! line: timestamp, qshort, qlong, baseline, channel, group counter.
//!
//! Usage:
//!   cargo run --bin exporter -- run.ade > run.txt

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wavedaq::common::cli::FileToolArgs;
use wavedaq::filters::offline::export_ascii;

fn main() -> anyhow::Result<()> {
    let args = FileToolArgs::parse();

    let directive = if args.verbose { "wavedaq=debug" } else { "wavedaq=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let exported = export_ascii(&args.input_file, &mut out)?;
    eprintln!("{}: {} events exported", args.input_file, exported);
    Ok(())
}
