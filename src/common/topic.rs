//! Topic framing for the pub/sub transport
//!
//! Every frame on the data and status sockets carries a topic string of
//! the form `<prefix>_v0[_n<msg_id>]_s<payload_bytes>` followed by the
//! raw payload. Subscribers filter by prefix and parse the suffix to
//! recover the framing.

use super::error::PipelineError;

/// Waveform bursts from the acquisition controller and the analyzer
pub const TOPIC_WAVEFORMS: &str = "data_abcd_waveforms";
/// PSD event payloads from the analyzer and the selectors
pub const TOPIC_EVENTS: &str = "data_abcd_events";
/// Periodic status documents on the status socket
pub const TOPIC_STATUS: &str = "status_abcd";
/// Event/error notifications on the status socket
pub const TOPIC_NOTICES: &str = "events_abcd";

/// A parsed topic frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub prefix: String,
    pub msg_id: Option<u64>,
    pub size: usize,
}

impl Topic {
    /// A topic without a message id (status and raw waveform bursts)
    pub fn sized(prefix: &str, size: usize) -> Self {
        Self {
            prefix: prefix.to_string(),
            msg_id: None,
            size,
        }
    }

    /// A topic with a monotonically increasing message id
    pub fn numbered(prefix: &str, msg_id: u64, size: usize) -> Self {
        Self {
            prefix: prefix.to_string(),
            msg_id: Some(msg_id),
            size,
        }
    }

    /// Render the wire form
    pub fn format(&self) -> String {
        match self.msg_id {
            Some(id) => format!("{}_v0_n{}_s{}", self.prefix, id, self.size),
            None => format!("{}_v0_s{}", self.prefix, self.size),
        }
    }

    /// Parse a wire topic back into its parts
    pub fn parse(topic: &str) -> Result<Self, PipelineError> {
        let v_pos = topic
            .rfind("_v0")
            .ok_or_else(|| PipelineError::Protocol(format!("topic without version: {topic}")))?;

        let prefix = topic[..v_pos].to_string();
        let suffix = &topic[v_pos + 3..];

        let (msg_id, size_part) = if let Some(rest) = suffix.strip_prefix("_n") {
            let s_pos = rest.rfind("_s").ok_or_else(|| {
                PipelineError::Protocol(format!("topic without size suffix: {topic}"))
            })?;
            let id = rest[..s_pos]
                .parse::<u64>()
                .map_err(|_| PipelineError::Protocol(format!("bad message id in topic: {topic}")))?;
            (Some(id), &rest[s_pos + 2..])
        } else if let Some(rest) = suffix.strip_prefix("_s") {
            (None, rest)
        } else {
            return Err(PipelineError::Protocol(format!(
                "topic without size suffix: {topic}"
            )));
        };

        let size = size_part
            .parse::<usize>()
            .map_err(|_| PipelineError::Protocol(format!("bad size in topic: {topic}")))?;

        Ok(Self {
            prefix,
            msg_id,
            size,
        })
    }

    /// Whether this topic carries the given payload kind
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.prefix == prefix
    }
}
