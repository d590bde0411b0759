//! DMA frame parsing for the acquisition devices
//!
//! The drivers deliver raw byte frames from DMA; these functions validate and
//! convert them into the fixed-size sample records carried by the ring
//! buffers. Byte order is always normalized explicitly; nothing relies on
//! struct packing.
//!
//! # ADS1299 frame (27 bytes)
//!
//! | Bytes  | Content                                                  |
//! |--------|----------------------------------------------------------|
//! | 0..3   | Status: `1100` + LOFF_STATP\[8\] + LOFF_STATN\[8\] + GPIO\[4\] |
//! | 3..27  | 8 channels × 24-bit two's complement, big-endian         |
//!
//! # I2S stereo frame (4 bytes)
//!
//! Left then right, 16-bit signed, in the byte order of the codec's DMA.

use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::types::{AudioFrame, EegSample, Fixed24_8, Timestamp, MAX_EEG_CHANNELS};

// ============================================================================
// ADS1299
// ============================================================================

/// Size of one ADS1299 read-data frame
pub const ADS1299_FRAME_SIZE: usize = 27;

/// Size of the ADS1299 status word
pub const ADS1299_STATUS_SIZE: usize = 3;

/// Expected high nibble of the status word
pub const ADS1299_STATUS_HEADER: u8 = 0xC;

/// Programmable gains supported by the ADS1299 PGA
pub const ADS1299_GAINS: [u8; 7] = [1, 2, 4, 6, 8, 12, 24];

/// Decoded ADS1299 status word.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ads1299Status {
    /// Positive-input lead-off flags, bit `n` = channel `n`
    pub lead_off_p: u8,
    /// Negative-input lead-off flags, bit `n` = channel `n`
    pub lead_off_n: u8,
    /// GPIO pin states
    pub gpio: u8,
}

impl Ads1299Status {
    /// Decode the 3-byte status word.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidHeader`] if the leading nibble is not `0xC`.
    pub fn from_bytes(bytes: [u8; ADS1299_STATUS_SIZE]) -> Result<Self, FrameError> {
        let header = bytes[0] >> 4;
        if header != ADS1299_STATUS_HEADER {
            return Err(FrameError::InvalidHeader { got: header, expected: ADS1299_STATUS_HEADER });
        }

        Ok(Self {
            lead_off_p: (bytes[0] << 4) | (bytes[1] >> 4),
            lead_off_n: (bytes[1] << 4) | (bytes[2] >> 4),
            gpio: bytes[2] & 0x0F,
        })
    }

    /// Whether either electrode of channel `index` is off.
    #[inline]
    #[must_use]
    pub const fn is_lead_off(&self, index: usize) -> bool {
        index < MAX_EEG_CHANNELS && ((self.lead_off_p | self.lead_off_n) >> index) & 1 == 1
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Ads1299Status {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "LOFF(p={:08b}, n={:08b})", self.lead_off_p, self.lead_off_n);
    }
}

/// Sign-extend a big-endian 24-bit two's complement word.
#[inline]
fn sign_extend_24(b: [u8; 3]) -> i32 {
    i32::from_be_bytes([b[0], b[1], b[2], 0]) >> 8
}

/// Parse one ADS1299 read-data frame into an [`EegSample`].
///
/// Channels whose electrode reports lead-off get quality 0; all others get
/// [`EegSample::QUALITY_GOOD`].
///
/// # Errors
///
/// Returns [`FrameError::InvalidLength`] for a frame that is not 27 bytes,
/// [`FrameError::InvalidGain`] for a gain the PGA does not support, and
/// [`FrameError::InvalidHeader`] for a corrupt status word.
pub fn parse_ads1299_frame(
    bytes: &[u8],
    gain: u8,
    timestamp_us: Timestamp,
    sequence: u32,
) -> Result<EegSample, FrameError> {
    if bytes.len() != ADS1299_FRAME_SIZE {
        return Err(FrameError::InvalidLength { received: bytes.len(), expected: ADS1299_FRAME_SIZE });
    }
    if !ADS1299_GAINS.contains(&gain) {
        return Err(FrameError::InvalidGain { requested: gain });
    }

    let status = Ads1299Status::from_bytes([bytes[0], bytes[1], bytes[2]])?;

    let mut sample = EegSample::new(timestamp_us, sequence);
    for (i, word) in bytes[ADS1299_STATUS_SIZE..].chunks_exact(3).enumerate() {
        let raw = sign_extend_24([word[0], word[1], word[2]]);
        sample.channels[i] = Fixed24_8::from_ads1299_raw(raw, gain);
        sample.quality[i] = if status.is_lead_off(i) { 0 } else { EegSample::QUALITY_GOOD };
    }

    Ok(sample)
}

// ============================================================================
// I2S
// ============================================================================

/// Size of one 16-bit stereo I2S frame
pub const I2S_FRAME_SIZE: usize = 4;

/// Byte order of DMA-delivered audio words.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

impl ByteOrder {
    #[inline]
    const fn read_i16(self, b: [u8; 2]) -> i16 {
        match self {
            Self::Little => i16::from_le_bytes(b),
            Self::Big => i16::from_be_bytes(b),
        }
    }
}

/// Parse one stereo I2S frame into an [`AudioFrame`].
///
/// # Errors
///
/// Returns [`FrameError::InvalidLength`] for a frame that is not 4 bytes.
pub fn parse_i2s_frame(
    bytes: &[u8],
    order: ByteOrder,
    timestamp_us: Timestamp,
    sequence: u32,
) -> Result<AudioFrame, FrameError> {
    if bytes.len() != I2S_FRAME_SIZE {
        return Err(FrameError::InvalidLength { received: bytes.len(), expected: I2S_FRAME_SIZE });
    }

    let left = order.read_i16([bytes[0], bytes[1]]);
    let right = order.read_i16([bytes[2], bytes[3]]);
    Ok(AudioFrame::new(timestamp_us, sequence, left, right))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ads_frame(status: [u8; 3], channels: [[u8; 3]; 8]) -> [u8; ADS1299_FRAME_SIZE] {
        let mut frame = [0u8; ADS1299_FRAME_SIZE];
        frame[..3].copy_from_slice(&status);
        for (i, ch) in channels.iter().enumerate() {
            frame[3 + i * 3..6 + i * 3].copy_from_slice(ch);
        }
        frame
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(sign_extend_24([0x00, 0x00, 0x01]), 1);
        assert_eq!(sign_extend_24([0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(sign_extend_24([0x7F, 0xFF, 0xFF]), 8_388_607);
        assert_eq!(sign_extend_24([0x80, 0x00, 0x00]), -8_388_608);
    }

    #[test]
    fn test_parse_ads1299_frame() {
        let mut channels = [[0u8; 3]; 8];
        channels[0] = [0x00, 0x03, 0xE8]; // +1000 LSB
        channels[1] = [0xFF, 0xFC, 0x18]; // -1000 LSB
        let frame = ads_frame([0xC0, 0x00, 0x00], channels);

        let sample = parse_ads1299_frame(&frame, 1, 5_000, 9).unwrap();
        assert_eq!(sample.timestamp_us, 5_000);
        assert_eq!(sample.sequence, 9);
        assert!((sample.channel_uv(0) - 535.0).abs() < 5.0);
        assert!((sample.channel_uv(1) + 535.0).abs() < 5.0);
        assert_eq!(sample.channels[2], Fixed24_8::ZERO);
        assert!(sample.quality.iter().all(|&q| q == EegSample::QUALITY_GOOD));
    }

    #[test]
    fn test_gain_scales_result() {
        let mut channels = [[0u8; 3]; 8];
        channels[0] = [0x00, 0x60, 0x00];
        let frame = ads_frame([0xC0, 0x00, 0x00], channels);

        let g1 = parse_ads1299_frame(&frame, 1, 0, 0).unwrap().channel_uv(0);
        let g24 = parse_ads1299_frame(&frame, 24, 0, 0).unwrap().channel_uv(0);
        assert!((g1 / g24 - 24.0).abs() < 0.1);
    }

    #[test]
    fn test_lead_off_zeroes_quality() {
        // LOFF_STATP bit 2 set, LOFF_STATN bit 7 set
        let status = [0xC0, 0x48, 0x00];
        let frame = ads_frame(status, [[0u8; 3]; 8]);

        let sample = parse_ads1299_frame(&frame, 24, 0, 0).unwrap();
        assert_eq!(sample.quality[2], 0);
        assert_eq!(sample.quality[7], 0);
        assert_eq!(sample.quality[0], EegSample::QUALITY_GOOD);
    }

    #[test]
    fn test_ads1299_frame_errors() {
        assert_eq!(
            parse_ads1299_frame(&[0xC0; 10], 1, 0, 0),
            Err(FrameError::InvalidLength { received: 10, expected: 27 })
        );

        let frame = ads_frame([0xA0, 0, 0], [[0u8; 3]; 8]);
        assert_eq!(
            parse_ads1299_frame(&frame, 1, 0, 0),
            Err(FrameError::InvalidHeader { got: 0xA, expected: 0xC })
        );

        let frame = ads_frame([0xC0, 0, 0], [[0u8; 3]; 8]);
        assert_eq!(parse_ads1299_frame(&frame, 3, 0, 0), Err(FrameError::InvalidGain { requested: 3 }));
    }

    #[test]
    fn test_parse_i2s_frame() {
        let bytes = [0x34, 0x12, 0xFE, 0xFF];
        let le = parse_i2s_frame(&bytes, ByteOrder::Little, 10, 1).unwrap();
        assert_eq!((le.left, le.right), (0x1234, -2));

        let be = parse_i2s_frame(&bytes, ByteOrder::Big, 10, 1).unwrap();
        assert_eq!((be.left, be.right), (0x3412, -257));

        assert_eq!(
            parse_i2s_frame(&bytes[..3], ByteOrder::Little, 0, 0),
            Err(FrameError::InvalidLength { received: 3, expected: 4 })
        );
    }
}
