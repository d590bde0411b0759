//! Error types for native processing
//!
//! Error types for the FFT engine, feature processors and configuration
//! using `thiserror`. Transient conditions (low signal quality, full or empty
//! buffers) are not errors here: they travel as flags and statistics.

use neuroloop_core::error::{BufferError, FrameError, TimeError};
use thiserror::Error;

/// Result alias for processing operations
pub type ProcessingResult<T> = Result<T, ProcessingError>;

/// Errors from the FFT engine and feature processors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    /// Invalid configuration or call argument
    #[error("Invalid parameter: {reason}")]
    InvalidParam {
        /// Description of the issue
        reason: &'static str,
    },

    /// FFT size outside the supported set
    #[error("Unsupported FFT size {size}: must be a power of two in {min}..={max}")]
    UnsupportedFftSize {
        /// Requested size
        size: usize,
        /// Smallest supported size
        min: usize,
        /// Largest supported size
        max: usize,
    },

    /// Input length does not match the configured size
    #[error("Size mismatch: expected {expected} samples, got {got}")]
    SizeMismatch {
        /// Configured length
        expected: usize,
        /// Supplied length
        got: usize,
    },

    /// Channel index not available on this processor
    #[error("Channel {channel} out of range (channel count {count})")]
    ChannelOutOfRange {
        /// Requested channel index
        channel: usize,
        /// Configured channel count
        count: usize,
    },

    /// Ring buffer setup failure
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// Time base failure
    #[error("Time error: {0}")]
    Time(#[from] TimeError),

    /// Device frame failure
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Configuration rejected before use
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration validation failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A value is outside its permitted range
    #[error("{field} out of range: {reason}")]
    OutOfRange {
        /// Offending field
        field: &'static str,
        /// Permitted range or constraint
        reason: &'static str,
    },

    /// A frequency band is empty or inverted
    #[error("Band {index} is invalid ({low_hz} Hz..{high_hz} Hz)")]
    InvalidBand {
        /// Position in the band list
        index: usize,
        /// Lower edge
        low_hz: f32,
        /// Upper edge
        high_hz: f32,
    },

    /// A ring buffer capacity is not a power of two
    #[error("{field} capacity {capacity} is not a power of two")]
    CapacityNotPowerOfTwo {
        /// Offending field
        field: &'static str,
        /// Configured capacity
        capacity: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ProcessingError::SizeMismatch { expected: 512, got: 256 };
        assert_eq!(err.to_string(), "Size mismatch: expected 512 samples, got 256");

        let err: ProcessingError = BufferError::BufferFull.into();
        assert_eq!(err.to_string(), "Buffer error: Ring buffer full");

        let err: ProcessingError =
            ConfigError::CapacityNotPowerOfTwo { field: "eeg", capacity: 500 }.into();
        assert_eq!(err.to_string(), "Configuration error: eeg capacity 500 is not a power of two");
    }
}
