//! Fatal tracing errors
//!
//! Every variant aborts the tracing session. The traced program keeps running;
//! only the trace is abandoned.

use crate::value::Iid;
use thiserror::Error;

/// Errors that end a tracing session
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("{event} at site {site}: object expected to be tracked has no id")]
    UntrackedObject { event: &'static str, site: Iid },

    #[error("write at site {site}: empty binding name")]
    InvalidWriteName { site: Iid },

    #[error("debug function call `{function}` at site {site}: first argument has no tracked metadata")]
    MissingDebugMetadata { function: String, site: Iid },

    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("invalid option file: {0}")]
    InvalidOptions(String),

    #[error("invalid event script: {0}")]
    InvalidScript(String),

    #[error("trace encoding failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("trace decoding failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tracing operations
pub type Result<T> = std::result::Result<T, TraceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_event_and_site() {
        let err = TraceError::UntrackedObject {
            event: "functionExit",
            site: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("functionExit"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let err: TraceError = io.into();
        assert!(matches!(err, TraceError::Io(_)));
    }
}
