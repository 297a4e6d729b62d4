//! Common error types for the pipeline nodes
//!
//! Each node can wrap these or define additional variants; the taxonomy
//! mirrors the recovery branches of the state machines (configuration,
//! communication, acquisition, plugin, protocol).

use thiserror::Error;

/// Shared pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    /// ZeroMQ transport error (tmq)
    #[error("ZMQ transport error: {0}")]
    ZmqTransport(#[from] tmq::TmqError),

    /// ZeroMQ socket error
    #[error("ZMQ socket error: {0}")]
    ZmqSocket(#[from] zmq::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed frame, truncated record, ragged event file
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Plugin loading or contract violation
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::Plugin(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type alias using PipelineError
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_message() {
        let err = PipelineError::config("missing cards array");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("missing cards array"));
    }

    #[test]
    fn io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: PipelineError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn protocol_error_message() {
        let err = PipelineError::protocol("short frame");
        assert!(err.to_string().contains("short frame"));
    }
}
