//! Command client binary
//!
//! Builds one JSON command frame and pushes it to a node's command
//! socket.
//!
//! Usage:
//!   cargo run --bin controller -- start
//!   cargo run --bin controller -- stop
//!   cargo run --bin controller -- reconfigure -f config.json
//!   cargo run --bin controller -- specific -a '{"serial": "SPD-01234", "command": "timestamp_reset"}'

use clap::Parser;
use serde_json::json;

use wavedaq::common::cli::ControllerArgs;
use wavedaq::common::CommandMessage;
use wavedaq::transport::PushSocket;

fn main() -> anyhow::Result<()> {
    let args = ControllerArgs::parse();

    let arguments = match (&args.arguments, &args.config_file) {
        (Some(text), _) => Some(serde_json::from_str(text)?),
        (None, Some(path)) => {
            let config: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(path)?)?;
            Some(json!({ "config": config }))
        }
        (None, None) => None,
    };

    let message = match arguments {
        Some(arguments) => CommandMessage::with_arguments(0, &args.command, arguments),
        None => CommandMessage::new(0, &args.command),
    };

    let context = zmq::Context::new();
    let socket = PushSocket::create(&context)?;
    socket.connect(&args.commands_address)?;
    socket.send_command(&message)?;

    // Give the queued frame a moment to reach the wire before the
    // context tears down
    std::thread::sleep(std::time::Duration::from_millis(200));

    println!("Sent {} to {}", args.command, args.commands_address);
    Ok(())
}
