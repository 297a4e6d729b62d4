//! Common data types shared across the pipeline nodes
//!
//! This module defines the two data-plane record kinds, the topic
//! framing, the command/status envelopes and the shared CLI and shutdown
//! infrastructure.

pub mod cli;
pub mod envelope;
pub mod error;
pub mod event;
pub mod topic;
pub mod waveform;

pub mod shutdown;

pub use envelope::{Command, CommandMessage, StatusEnvelope};
pub use error::{PipelineError, PipelineResult};
pub use event::{decode_events, encode_events, EventPsd, EVENT_PSD_SIZE};
pub use shutdown::TerminationFlag;
pub use topic::{Topic, TOPIC_EVENTS, TOPIC_NOTICES, TOPIC_STATUS, TOPIC_WAVEFORMS};
pub use waveform::{Waveform, WaveformFrames, WaveformView, WAVEFORM_HEADER_SIZE};
