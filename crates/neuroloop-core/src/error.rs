//! Error types for the neuroloop core
//!
//! These errors work in `no_std` environments and never allocate. Every
//! fallible core operation returns one of them as a typed result; nothing in
//! the core panics on a full or empty buffer or on a missing clock source.

use core::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Ring Buffer Errors
// ============================================================================

/// Errors from the SPSC ring buffer.
///
/// `BufferFull` and `BufferEmpty` are steady-state conditions, not faults:
/// they are counted in the buffer statistics and handled by call-site policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferError {
    /// Capacity or element layout rejected at construction
    InvalidParam {
        /// Description of the issue
        reason: &'static str,
    },
    /// No free slot for the element (overrun)
    BufferFull,
    /// No element available (underrun)
    BufferEmpty,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam { reason } => write!(f, "Invalid ring buffer parameter: {reason}"),
            Self::BufferFull => write!(f, "Ring buffer full"),
            Self::BufferEmpty => write!(f, "Ring buffer empty"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for BufferError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::InvalidParam { reason } => defmt::write!(f, "RB param: {}", reason),
            Self::BufferFull => defmt::write!(f, "RB full"),
            Self::BufferEmpty => defmt::write!(f, "RB empty"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BufferError {}

// ============================================================================
// Time Synchronization Errors
// ============================================================================

/// Errors from the time synchronization service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeError {
    /// The free-running counter could not be started (fatal)
    HardwareError {
        /// Description of the failure
        reason: &'static str,
    },
    /// Invalid configuration (zero frequency, zero step, ...)
    InvalidParam {
        /// Description of the issue
        reason: &'static str,
    },
    /// Drift reference clock could not be read (non-fatal)
    ReferenceUnavailable,
    /// Bounded polling loop expired
    Timeout {
        /// Timeout duration in microseconds
        timeout_us: u64,
    },
}

impl TimeError {
    /// Whether this error prevents the pipeline from producing timestamps
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::HardwareError { .. })
    }
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareError { reason } => write!(f, "Timer hardware error: {reason}"),
            Self::InvalidParam { reason } => write!(f, "Invalid time parameter: {reason}"),
            Self::ReferenceUnavailable => write!(f, "Drift reference clock unavailable"),
            Self::Timeout { timeout_us } => write!(f, "Polling timed out after {timeout_us}µs"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TimeError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::HardwareError { reason } => defmt::write!(f, "Timer HW: {}", reason),
            Self::InvalidParam { reason } => defmt::write!(f, "Time param: {}", reason),
            Self::ReferenceUnavailable => defmt::write!(f, "No drift ref"),
            Self::Timeout { timeout_us } => defmt::write!(f, "Timeout: {}us", timeout_us),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TimeError {}

// ============================================================================
// Frame Parsing Errors
// ============================================================================

/// Errors while parsing DMA-delivered device frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameError {
    /// Frame shorter or longer than the device format
    InvalidLength {
        /// Bytes received
        received: usize,
        /// Bytes expected
        expected: usize,
    },
    /// Status word does not carry the expected header
    InvalidHeader {
        /// Header nibble that was read
        got: u8,
        /// Header nibble expected
        expected: u8,
    },
    /// Gain not supported by the ADC
    InvalidGain {
        /// Requested gain value
        requested: u8,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { received, expected } => {
                write!(f, "Invalid frame length: got {received} bytes, expected {expected}")
            }
            Self::InvalidHeader { got, expected } => {
                write!(f, "Invalid status header: got 0x{got:X}, expected 0x{expected:X}")
            }
            Self::InvalidGain { requested } => write!(f, "Invalid gain: {requested}"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for FrameError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            Self::InvalidLength { received, expected } => {
                defmt::write!(f, "Frame len {}/{}", received, expected);
            }
            Self::InvalidHeader { got, expected } => {
                defmt::write!(f, "Header {:X} != {:X}", got, expected);
            }
            Self::InvalidGain { requested } => defmt::write!(f, "Gain {}", requested),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    extern crate std;
    use std::string::ToString;

    use super::*;

    #[test]
    fn test_time_error_fatality() {
        assert!(TimeError::HardwareError { reason: "no clock" }.is_fatal());
        assert!(!TimeError::ReferenceUnavailable.is_fatal());
        assert!(!TimeError::Timeout { timeout_us: 10 }.is_fatal());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(BufferError::BufferFull.to_string(), "Ring buffer full");
        assert_eq!(
            FrameError::InvalidLength { received: 3, expected: 27 }.to_string(),
            "Invalid frame length: got 3 bytes, expected 27"
        );
        assert_eq!(
            TimeError::Timeout { timeout_us: 500 }.to_string(),
            "Polling timed out after 500µs"
        );
    }
}
