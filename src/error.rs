use std::time::Duration;
use thiserror::Error;

/// Why a single telemetry sub-reading could not be taken.
#[derive(Error, Debug)]
pub enum ReadingError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),

    #[error("{tool} not found")]
    ToolMissing { tool: String },

    #[error("{tool} timed out after {} ms", timeout.as_millis())]
    Timeout { tool: String, timeout: Duration },

    #[error("{tool} exited with {status}")]
    ToolFailed { tool: String, status: String },

    #[error("unparsable output from {source_name}: {detail}")]
    Parse { source_name: String, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadingError {
    pub fn unavailable(what: impl Into<String>) -> Self {
        ReadingError::Unavailable(what.into())
    }

    pub fn parse(source_name: impl Into<String>, detail: impl Into<String>) -> Self {
        ReadingError::Parse {
            source_name: source_name.into(),
            detail: detail.into(),
        }
    }
}

/// A workload refused to start because running it could exhaust a resource.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{reason}")]
pub struct Rejected {
    pub reason: String,
}

impl Rejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("no compatible compute device")]
    NoDevice,

    #[error("failed to open compute device: {0}")]
    Open(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),
}
