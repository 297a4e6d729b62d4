//! CLI argument parsing for the pipeline binaries
//!
//! Common arguments are shared via composition: each binary has its own
//! Args struct that embeds `CommonArgs` with clap's `flatten`.

use clap::Parser;

/// Arguments shared across all pipeline nodes
///
/// The socket addresses are optional so every binary can fall back to
/// its own default ports; two nodes on one host must not collide.
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Status socket address
    #[arg(short = 'S', long = "status")]
    pub status_address: Option<String>,

    /// Commands socket address (PULL)
    #[arg(short = 'C', long = "commands")]
    pub commands_address: Option<String>,

    /// Base period in milliseconds
    #[arg(short = 'T', long = "period", default_value_t = 1)]
    pub base_period_ms: u64,

    /// Verbose execution
    #[arg(short = 'v')]
    pub verbose: bool,

    /// More verbose execution
    #[arg(short = 'V')]
    pub very_verbose: bool,
}

impl CommonArgs {
    /// Verbosity level: 0 quiet, 1 with -v, 2 with -V
    pub fn verbosity(&self) -> u8 {
        if self.very_verbose {
            2
        } else if self.verbose {
            1
        } else {
            0
        }
    }

    /// A tracing directive matching the verbosity flags
    pub fn log_filter(&self) -> &'static str {
        match self.verbosity() {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// The status address, or the binary's own default
    pub fn status_address_or(&self, default: &str) -> String {
        self.status_address
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    /// The commands address, or the binary's own default
    pub fn commands_address_or(&self, default: &str) -> String {
        self.commands_address
            .clone()
            .unwrap_or_else(|| default.to_string())
    }
}

/// Arguments for the acquisition controller
#[derive(Parser, Debug, Clone)]
#[command(about = "Data acquisition controller for waveform digitizers")]
pub struct AcquisitionArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Data socket address (PUB)
    #[arg(short = 'D', long = "data", default_value = "tcp://*:16181")]
    pub data_address: String,

    /// Digitizer configuration file
    #[arg(short = 'f', long = "config", default_value = "config.json")]
    pub config_file: String,

    /// Identify the connected digitizers and exit
    #[arg(short = 'I', long = "identify")]
    pub identify_only: bool,
}

/// Arguments for the waveform analyzer
#[derive(Parser, Debug, Clone)]
#[command(about = "Online waveform analyzer with per-channel plugins")]
pub struct AnalyzerArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Input data socket address to subscribe to (waveforms)
    #[arg(short = 'A', long = "input", default_value = "tcp://127.0.0.1:16181")]
    pub input_address: String,

    /// Output data socket address (PUB, events and annotated waveforms)
    #[arg(short = 'D', long = "data", default_value = "tcp://*:16185")]
    pub data_address: String,

    /// Analyzer configuration file
    #[arg(short = 'f', long = "config", default_value = "waan_config.json")]
    pub config_file: String,
}

/// Arguments for the stream selector nodes
#[derive(Parser, Debug, Clone)]
pub struct SelectorArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Input data socket address to subscribe to
    #[arg(short = 'A', long = "input", default_value = "tcp://127.0.0.1:16185")]
    pub input_address: String,

    /// Output data socket address (PUB)
    #[arg(short = 'D', long = "data", default_value = "tcp://*:16187")]
    pub data_address: String,
}

/// Arguments for the command-line controller client
#[derive(Parser, Debug, Clone)]
#[command(about = "Send a JSON command frame to a pipeline node")]
pub struct ControllerArgs {
    /// Target node's commands address
    #[arg(short = 'C', long = "commands", default_value = "tcp://127.0.0.1:16182")]
    pub commands_address: String,

    /// Command to send (start, stop, off, quit, reconfigure, specific, simulate_error)
    pub command: String,

    /// JSON arguments for the command
    #[arg(short = 'a', long = "arguments")]
    pub arguments: Option<String>,

    /// Configuration file for reconfigure commands
    #[arg(short = 'f', long = "config")]
    pub config_file: Option<String>,
}

/// Arguments for the offline event-file tools
#[derive(Parser, Debug, Clone)]
pub struct FileToolArgs {
    /// Input event file (.ade)
    pub input_file: String,

    /// Verbose execution
    #[arg(short = 'v')]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquisition_defaults() {
        let args = AcquisitionArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.config_file, "config.json");
        assert_eq!(args.common.base_period_ms, 1);
        assert!(!args.identify_only);
        assert_eq!(args.common.verbosity(), 0);
    }

    #[test]
    fn acquisition_short_flags() {
        let args = AcquisitionArgs::try_parse_from([
            "test", "-S", "tcp://*:7001", "-D", "tcp://*:7002", "-C", "tcp://*:7003", "-f",
            "digi.json", "-T", "5", "-v",
        ])
        .unwrap();
        assert_eq!(args.common.status_address.as_deref(), Some("tcp://*:7001"));
        assert_eq!(args.data_address, "tcp://*:7002");
        assert_eq!(args.common.commands_address.as_deref(), Some("tcp://*:7003"));
        assert_eq!(args.config_file, "digi.json");
        assert_eq!(args.common.base_period_ms, 5);
        assert_eq!(args.common.verbosity(), 1);
    }

    #[test]
    fn address_fallbacks_apply_per_binary() {
        let args = AcquisitionArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(
            args.common.status_address_or("tcp://*:16180"),
            "tcp://*:16180"
        );

        let args =
            AcquisitionArgs::try_parse_from(["test", "-S", "tcp://*:9999"]).unwrap();
        assert_eq!(args.common.status_address_or("tcp://*:16180"), "tcp://*:9999");
    }

    #[test]
    fn identify_flag() {
        let args = AcquisitionArgs::try_parse_from(["test", "-I"]).unwrap();
        assert!(args.identify_only);
    }

    #[test]
    fn very_verbose_wins() {
        let args = AcquisitionArgs::try_parse_from(["test", "-v", "-V"]).unwrap();
        assert_eq!(args.common.verbosity(), 2);
        assert_eq!(args.common.log_filter(), "trace");
    }

    #[test]
    fn analyzer_input_address() {
        let args =
            AnalyzerArgs::try_parse_from(["test", "-A", "tcp://127.0.0.1:9999"]).unwrap();
        assert_eq!(args.input_address, "tcp://127.0.0.1:9999");
    }

    #[test]
    fn controller_command_positional() {
        let args = ControllerArgs::try_parse_from(["test", "start"]).unwrap();
        assert_eq!(args.command, "start");
        assert!(args.arguments.is_none());
    }
}
