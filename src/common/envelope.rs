//! Command and status envelopes
//!
//! Commands arrive as JSON frames on a PULL socket:
//! `{"msg_ID": 3, "command": "start", "arguments": {...}}`.
//! Status documents leave on the PUB socket wrapped in the envelope
//! `{module, timestamp, msg_ID, ...}` where `timestamp` is ISO-8601
//! local time with the UTC offset.

use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::PipelineError;

/// Wire form of one command frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    #[serde(rename = "msg_ID")]
    pub msg_id: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl CommandMessage {
    pub fn new(msg_id: u64, command: impl Into<String>) -> Self {
        Self {
            msg_id,
            command: command.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(msg_id: u64, command: impl Into<String>, arguments: Value) -> Self {
        Self {
            msg_id,
            command: command.into(),
            arguments: Some(arguments),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Interpret the command string
    pub fn parse(&self) -> Result<Command, PipelineError> {
        match self.command.as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "off" => Ok(Command::Off),
            "quit" => Ok(Command::Quit),
            "reconfigure" => {
                let config = self
                    .arguments
                    .as_ref()
                    .and_then(|args| args.get("config"))
                    .cloned()
                    .ok_or_else(|| {
                        PipelineError::config("reconfigure command without a config argument")
                    })?;
                Ok(Command::Reconfigure { config })
            }
            "specific" => {
                let arguments = self
                    .arguments
                    .clone()
                    .ok_or_else(|| PipelineError::config("specific command without arguments"))?;
                Ok(Command::Specific { arguments })
            }
            "simulate_error" => Ok(Command::SimulateError),
            other => Err(PipelineError::config(format!("unknown command: {other}"))),
        }
    }
}

/// Runtime commands understood by the pipeline nodes
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Off,
    Quit,
    Reconfigure { config: Value },
    Specific { arguments: Value },
    SimulateError,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Start => write!(f, "start"),
            Command::Stop => write!(f, "stop"),
            Command::Off => write!(f, "off"),
            Command::Quit => write!(f, "quit"),
            Command::Reconfigure { .. } => write!(f, "reconfigure"),
            Command::Specific { .. } => write!(f, "specific"),
            Command::SimulateError => write!(f, "simulate_error"),
        }
    }
}

/// Builder for status-socket JSON documents
#[derive(Debug, Clone)]
pub struct StatusEnvelope {
    body: Map<String, Value>,
}

impl StatusEnvelope {
    /// Start an envelope for `module` with the next status message id
    pub fn new(module: &str, msg_id: u64) -> Self {
        let mut body = Map::new();
        body.insert("module".to_string(), json!(module));
        body.insert(
            "timestamp".to_string(),
            json!(Local::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        body.insert("msg_ID".to_string(), json!(msg_id));
        Self { body }
    }

    /// An event notification (`type: "event"`)
    pub fn event(module: &str, msg_id: u64, text: &str) -> Self {
        Self::new(module, msg_id)
            .field("type", json!("event"))
            .field("event", json!(text))
    }

    /// An error notification (`type: "error"`)
    pub fn error(module: &str, msg_id: u64, text: &str) -> Self {
        Self::new(module, msg_id)
            .field("type", json!("error"))
            .field("error", json!(text))
    }

    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.body.insert(key.to_string(), value);
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_json_roundtrip() {
        let cmd = CommandMessage::new(42, "start");
        let bytes = cmd.to_json().unwrap();
        let decoded = CommandMessage::from_json(&bytes).unwrap();
        assert_eq!(decoded.msg_id, 42);
        assert_eq!(decoded.parse().unwrap(), Command::Start);
    }

    #[test]
    fn msg_id_wire_name() {
        let bytes = CommandMessage::new(7, "stop").to_json().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["msg_ID"], json!(7));
    }

    #[test]
    fn reconfigure_requires_config() {
        let bare = CommandMessage::new(0, "reconfigure");
        assert!(bare.parse().is_err());

        let with_config = CommandMessage::with_arguments(
            1,
            "reconfigure",
            json!({"config": {"channels": []}}),
        );
        match with_config.parse().unwrap() {
            Command::Reconfigure { config } => {
                assert!(config.get("channels").is_some());
            }
            other => panic!("expected reconfigure, got {other}"),
        }
    }

    #[test]
    fn specific_keeps_arguments() {
        let cmd = CommandMessage::with_arguments(
            2,
            "specific",
            json!({"serial": "SPD-01234", "command": "timestamp_reset"}),
        );
        match cmd.parse().unwrap() {
            Command::Specific { arguments } => {
                assert_eq!(arguments["serial"], json!("SPD-01234"));
            }
            other => panic!("expected specific, got {other}"),
        }
    }

    #[test]
    fn unknown_command_rejected() {
        let cmd = CommandMessage::new(3, "dance");
        assert!(cmd.parse().is_err());
    }

    #[test]
    fn status_envelope_fields() {
        let value = StatusEnvelope::error("wavedaq_acquisition", 9, "data overflow")
            .field("statuses", json!([]))
            .into_value();

        assert_eq!(value["module"], json!("wavedaq_acquisition"));
        assert_eq!(value["msg_ID"], json!(9));
        assert_eq!(value["type"], json!("error"));
        assert_eq!(value["error"], json!("data overflow"));
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }
}
