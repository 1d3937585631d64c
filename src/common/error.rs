//! Common error types for the DAQ pipeline and the scan engine
//!
//! # Design Principles (KISS)
//! - Data-path conditions (buffer empty, overflow) live in `DaqError`
//! - Pixel-level decoding failures live in `PixelError` and are only counted
//! - Everything the test API can fail with is wrapped in `PipelineError`

use thiserror::Error;

/// Errors raised by the raw sample source and propagated through the splitter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaqError {
    /// No data buffered right now. Callers poll again later.
    #[error("DAQ buffer empty: no event available")]
    BufferEmpty,

    /// The channel reported an overflow with an empty buffer. Data is lost.
    #[error("DAQ buffer overflow (status 0x{status:02x})")]
    BufferOverflow { status: u8 },

    /// The underlying channel failed
    #[error("DAQ channel error: {0}")]
    Channel(String),
}

impl DaqError {
    /// Create a channel error
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// True for the transient "no event available" condition
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::BufferEmpty)
    }
}

/// Result type alias using DaqError
pub type DaqResult<T> = Result<T, DaqError>;

/// Failure to decode a single pixel hit
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelError {
    #[error("invalid pixel address (column {column}, row {row})")]
    InvalidAddress { column: i32, row: i32 },

    #[error("invalid pulse height: fill bit set")]
    InvalidPulseHeight,

    #[error("corrupt data buffer: row {row} decoded")]
    CorruptBuffer { row: i32 },
}

/// Errors of the scan engine and the test API
#[derive(Error, Debug)]
pub enum PipelineError {
    /// DAQ data path error
    #[error("DAQ error: {0}")]
    Daq(#[from] DaqError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Register name unknown to the dictionary
    #[error("Invalid register name \"{0}\"")]
    InvalidRegister(String),

    /// Threshold level outside 1..=100 percent
    #[error("Threshold level of {0}% is not possible")]
    InvalidThreshold(u8),

    /// Testboard call failed
    #[error("Testboard error: {0}")]
    Hal(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a testboard error
    pub fn hal(msg: impl Into<String>) -> Self {
        Self::Hal(msg.into())
    }

    /// Create a generic error
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
    fn test_config_error() {
        let err = PipelineError::config("missing required field");
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("missing required field"));
    }

    #[test]
    fn test_buffer_empty_is_transient() {
        assert!(DaqError::BufferEmpty.is_empty());
        assert!(!DaqError::BufferOverflow { status: 0x02 }.is_empty());
        assert!(!DaqError::channel("usb gone").is_empty());
    }

    #[test]
    fn test_overflow_message_carries_status() {
        let err = DaqError::BufferOverflow { status: 0x04 };
        assert!(err.to_string().contains("0x04"));
    }

    #[test]
    fn test_daq_error_from() {
        let err: PipelineError = DaqError::BufferEmpty.into();
        assert!(err.to_string().contains("no event available"));
    }

    #[test]
    fn test_invalid_register_error() {
        let err = PipelineError::InvalidRegister("vfoo".to_string());
        assert!(err.to_string().contains("vfoo"));
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PipelineError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_pixel_error_display() {
        let err = PixelError::InvalidAddress { column: 60, row: 3 };
        assert!(err.to_string().contains("column 60"));
    }
}
