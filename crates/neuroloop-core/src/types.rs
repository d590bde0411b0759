//! Core types for the neuroloop pipeline
//!
//! This module provides the fixed-size records that travel through the
//! acquisition ring buffers and the configuration-level value types shared
//! by every tier:
//! - Fixed-point microvolt representation for `no_std` producers
//! - EEG channel identifiers following the 10-20 system
//! - EEG and stereo audio sample records
//! - Frequency bands and channel selection masks

use core::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Monotonic microsecond count since boot.
///
/// Compared with signed differences (see [`crate::time_sync::diff`]) so that
/// "before/after" stays meaningful across the theoretical 64-bit wrap.
pub type Timestamp = u64;

/// Maximum number of EEG channels carried by one [`EegSample`].
pub const MAX_EEG_CHANNELS: usize = 8;

/// Maximum number of frequency bands a processor can integrate.
pub const MAX_BANDS: usize = 8;

// ============================================================================
// Fixed-Point Math (Q24.8 format)
// ============================================================================

/// Fixed-point number in Q24.8 format for `no_std` producers.
///
/// 24 bits of integer and 8 bits of fraction give a range of roughly
/// ±8,388,607 with a resolution of 1/256. EEG values are stored in µV.
///
/// # Example
///
/// ```
/// use neuroloop_core::types::Fixed24_8;
///
/// let a = Fixed24_8::from_f32(1.5);
/// let b = Fixed24_8::from_f32(2.25);
/// assert!(((a + b).to_f32() - 3.75).abs() < 0.01);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Fixed24_8(i32);

impl Fixed24_8 {
    /// Zero value (0.0)
    pub const ZERO: Self = Self(0);

    /// One value (1.0)
    pub const ONE: Self = Self(256);

    /// Fractional bits (8)
    pub const FRAC_BITS: u32 = 8;

    /// Scale factor (256)
    pub const SCALE: i32 = 1 << Self::FRAC_BITS;

    /// Create from raw underlying representation
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Get the raw underlying representation
    #[inline]
    #[must_use]
    pub const fn to_raw(self) -> i32 {
        self.0
    }

    /// Convert from f32, saturating at the representable range
    #[inline]
    #[must_use]
    pub fn from_f32(f: f32) -> Self {
        Self((f * Self::SCALE as f32) as i32)
    }

    /// Convert to f32
    #[inline]
    #[must_use]
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / Self::SCALE as f32
    }

    /// Absolute value
    #[inline]
    #[must_use]
    pub const fn abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// Convert an ADS1299 24-bit signed raw value to microvolts.
    ///
    /// The ADS1299 LSB is 4.5 V / 2^23 / gain, about 0.536 µV at gain 1.
    ///
    /// # Arguments
    ///
    /// * `raw` - 24-bit signed ADC value (sign-extended to i32)
    /// * `gain` - Programmable gain (1, 2, 4, 6, 8, 12 or 24)
    #[inline]
    #[must_use]
    pub fn from_ads1299_raw(raw: i32, gain: u8) -> Self {
        // 0.536 µV * 256 ≈ 137
        const LSB_UV_Q8: i64 = 137;

        let gain = i64::from(gain.max(1));
        Self((i64::from(raw) * LSB_UV_Q8 / gain) as i32)
    }
}

impl Add for Fixed24_8 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Fixed24_8 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Mul for Fixed24_8 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let product = (i64::from(self.0) * i64::from(rhs.0)) >> Self::FRAC_BITS;
        Self(product.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
    }
}

impl Neg for Fixed24_8 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self(self.0.saturating_neg())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Fixed24_8 {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}Q8", self.0);
    }
}

// ============================================================================
// EEG Channel Types
// ============================================================================

/// EEG channel identifier following the 10-20 system.
///
/// Maps the eight ADS1299 inputs to a frontal/central/parietal/occipital
/// montage. Frontal asymmetry typically uses `Fp1`/`Fp2` or `F3`/`F4`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EegChannel {
    /// Frontal-polar left
    Fp1 = 0,
    /// Frontal-polar right
    Fp2 = 1,
    /// Frontal left
    F3 = 2,
    /// Frontal right
    F4 = 3,
    /// Central left
    C3 = 4,
    /// Central right
    C4 = 5,
    /// Occipital left
    O1 = 6,
    /// Occipital right
    O2 = 7,
}

impl EegChannel {
    /// All channels in ADC input order
    pub const ALL: [Self; MAX_EEG_CHANNELS] = [
        Self::Fp1, Self::Fp2, Self::F3, Self::F4,
        Self::C3, Self::C4, Self::O1, Self::O2,
    ];

    /// Get the array index for this channel
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Get channel from index (returns None if out of range)
    #[inline]
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < MAX_EEG_CHANNELS {
            Some(Self::ALL[index])
        } else {
            None
        }
    }

    /// Get the 10-20 system name for this channel
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fp1 => "Fp1",
            Self::Fp2 => "Fp2",
            Self::F3 => "F3",
            Self::F4 => "F4",
            Self::C3 => "C3",
            Self::C4 => "C4",
            Self::O1 => "O1",
            Self::O2 => "O2",
        }
    }

    /// Check if this channel is on the left hemisphere
    #[inline]
    #[must_use]
    pub const fn is_left(self) -> bool {
        matches!(self, Self::Fp1 | Self::F3 | Self::C3 | Self::O1)
    }

    /// Get the contralateral (opposite hemisphere) channel
    #[inline]
    #[must_use]
    pub const fn contralateral(self) -> Self {
        match self {
            Self::Fp1 => Self::Fp2,
            Self::Fp2 => Self::Fp1,
            Self::F3 => Self::F4,
            Self::F4 => Self::F3,
            Self::C3 => Self::C4,
            Self::C4 => Self::C3,
            Self::O1 => Self::O2,
            Self::O2 => Self::O1,
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EegChannel {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", self.name());
    }
}

/// Bitmask selecting a subset of EEG channels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ChannelMask(u8);

impl ChannelMask {
    /// No channels selected
    pub const NONE: Self = Self(0);

    /// Create from a raw bitmask (bit `i` selects channel `i`)
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Select a single channel by index.
    ///
    /// Indices beyond [`MAX_EEG_CHANNELS`] produce an empty mask.
    #[inline]
    #[must_use]
    pub const fn single(index: usize) -> Self {
        if index < MAX_EEG_CHANNELS {
            Self(1 << index)
        } else {
            Self::NONE
        }
    }

    /// Select the first `count` channels
    #[inline]
    #[must_use]
    pub const fn first(count: usize) -> Self {
        if count >= MAX_EEG_CHANNELS {
            Self(u8::MAX)
        } else {
            Self(((1u16 << count) - 1) as u8)
        }
    }

    /// Add a channel to the selection
    #[inline]
    #[must_use]
    pub const fn with(self, index: usize) -> Self {
        Self(self.0 | Self::single(index).0)
    }

    /// Raw bitmask
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether channel `index` is selected
    #[inline]
    #[must_use]
    pub const fn contains(self, index: usize) -> bool {
        index < MAX_EEG_CHANNELS && (self.0 >> index) & 1 == 1
    }

    /// Number of selected channels
    #[inline]
    #[must_use]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether no channel is selected
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over selected channel indices in ascending order
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_EEG_CHANNELS).filter(move |&i| self.contains(i))
    }
}

impl From<EegChannel> for ChannelMask {
    fn from(ch: EegChannel) -> Self {
        Self::single(ch.index())
    }
}

// ============================================================================
// Sample Types
// ============================================================================

/// Single EEG sample containing all 8 channels.
///
/// Written by the acquisition driver once per ADS1299 conversion. The
/// per-channel `quality` (0-100) is derived by the driver from lead-off and
/// impedance checks and travels with the sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EegSample {
    /// Timestamp in microseconds since boot
    pub timestamp_us: Timestamp,
    /// Sequence number for ordering/loss detection
    pub sequence: u32,
    /// Channel values in microvolts (Q24.8 fixed-point)
    pub channels: [Fixed24_8; MAX_EEG_CHANNELS],
    /// Per-channel signal quality, 0 (unusable) to 100 (good contact)
    pub quality: [u8; MAX_EEG_CHANNELS],
}

impl EegSample {
    /// Full quality score
    pub const QUALITY_GOOD: u8 = 100;

    /// Create a new sample with zero values and full quality
    #[inline]
    #[must_use]
    pub const fn new(timestamp_us: Timestamp, sequence: u32) -> Self {
        Self {
            timestamp_us,
            sequence,
            channels: [Fixed24_8::ZERO; MAX_EEG_CHANNELS],
            quality: [Self::QUALITY_GOOD; MAX_EEG_CHANNELS],
        }
    }

    /// Get the value for a specific channel
    #[inline]
    #[must_use]
    pub fn channel(&self, ch: EegChannel) -> Fixed24_8 {
        self.channels[ch.index()]
    }

    /// Set the value for a specific channel
    #[inline]
    pub fn set_channel(&mut self, ch: EegChannel, value: Fixed24_8) {
        self.channels[ch.index()] = value;
    }

    /// Channel value by index in µV
    #[inline]
    #[must_use]
    pub fn channel_uv(&self, index: usize) -> f32 {
        self.channels[index].to_f32()
    }
}

impl Default for EegSample {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EegSample {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "EEG[{}]@{}us", self.sequence, self.timestamp_us);
    }
}

/// Which part of a stereo frame an audio processor analyzes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AudioChannel {
    /// Left channel only
    Left,
    /// Right channel only
    Right,
    /// Average of left and right
    #[default]
    Mix,
}

/// Single stereo audio frame (16-bit PCM per channel).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Timestamp in microseconds since boot
    pub timestamp_us: Timestamp,
    /// Sequence number for ordering/loss detection
    pub sequence: u32,
    /// Left channel PCM
    pub left: i16,
    /// Right channel PCM
    pub right: i16,
}

impl AudioFrame {
    /// Full-scale divisor for 16-bit PCM
    pub const FULL_SCALE: f32 = 32768.0;

    /// Create a new frame
    #[inline]
    #[must_use]
    pub const fn new(timestamp_us: Timestamp, sequence: u32, left: i16, right: i16) -> Self {
        Self { timestamp_us, sequence, left, right }
    }

    /// Selected channel normalized to [-1.0, 1.0)
    #[inline]
    #[must_use]
    pub fn to_f32(&self, channel: AudioChannel) -> f32 {
        let left = f32::from(self.left) / Self::FULL_SCALE;
        let right = f32::from(self.right) / Self::FULL_SCALE;
        match channel {
            AudioChannel::Left => left,
            AudioChannel::Right => right,
            AudioChannel::Mix => 0.5 * (left + right),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for AudioFrame {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "PCM[{}]@{}us L={} R={}", self.sequence, self.timestamp_us, self.left, self.right);
    }
}

// ============================================================================
// Frequency Bands
// ============================================================================

/// Named EEG frequency band.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EegBand {
    /// Delta: 0.5-4 Hz (deep sleep)
    Delta,
    /// Theta: 4-8 Hz (drowsiness, memory)
    Theta,
    /// Alpha: 8-13 Hz (relaxed, eyes closed)
    Alpha,
    /// Beta: 13-30 Hz (active thinking)
    Beta,
    /// Gamma: 30-50 Hz (cognitive processing)
    Gamma,
    /// Sensorimotor rhythm: 12-15 Hz
    Smr,
    /// User-defined band, identified by an index
    Custom(u8),
}

impl EegBand {
    /// Get the conventional frequency range (low, high) in Hz.
    ///
    /// Returns `None` for [`EegBand::Custom`].
    #[inline]
    #[must_use]
    pub const fn range_hz(self) -> Option<(f32, f32)> {
        match self {
            Self::Delta => Some((0.5, 4.0)),
            Self::Theta => Some((4.0, 8.0)),
            Self::Alpha => Some((8.0, 13.0)),
            Self::Beta => Some((13.0, 30.0)),
            Self::Gamma => Some((30.0, 50.0)),
            Self::Smr => Some((12.0, 15.0)),
            Self::Custom(_) => None,
        }
    }

    /// Get the band name
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delta => "Delta",
            Self::Theta => "Theta",
            Self::Alpha => "Alpha",
            Self::Beta => "Beta",
            Self::Gamma => "Gamma",
            Self::Smr => "SMR",
            Self::Custom(_) => "Custom",
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EegBand {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", self.name());
    }
}

/// A named `[low_hz, high_hz]` range used for band-power integration.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencyBand {
    /// Band identity
    pub band: EegBand,
    /// Lower edge in Hz (inclusive)
    pub low_hz: f32,
    /// Upper edge in Hz (inclusive)
    pub high_hz: f32,
}

impl FrequencyBand {
    /// Delta band (0.5-4 Hz)
    pub const DELTA: Self = Self::new(EegBand::Delta, 0.5, 4.0);
    /// Theta band (4-8 Hz)
    pub const THETA: Self = Self::new(EegBand::Theta, 4.0, 8.0);
    /// Alpha band (8-13 Hz)
    pub const ALPHA: Self = Self::new(EegBand::Alpha, 8.0, 13.0);
    /// Beta band (13-30 Hz)
    pub const BETA: Self = Self::new(EegBand::Beta, 13.0, 30.0);
    /// Gamma band (30-50 Hz)
    pub const GAMMA: Self = Self::new(EegBand::Gamma, 30.0, 50.0);

    /// Create a band
    #[inline]
    #[must_use]
    pub const fn new(band: EegBand, low_hz: f32, high_hz: f32) -> Self {
        Self { band, low_hz, high_hz }
    }

    /// Band name
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.band.name()
    }

    /// Whether `freq_hz` falls inside the band (edges inclusive)
    #[inline]
    #[must_use]
    pub fn contains(&self, freq_hz: f32) -> bool {
        freq_hz >= self.low_hz && freq_hz <= self.high_hz
    }

    /// Whether the range is well-formed (finite, non-negative, low < high)
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.low_hz.is_finite()
            && self.high_hz.is_finite()
            && self.low_hz >= 0.0
            && self.low_hz < self.high_hz
    }
}

/// The five canonical EEG bands in ascending order.
pub const CANONICAL_BANDS: [FrequencyBand; 5] = [
    FrequencyBand::DELTA,
    FrequencyBand::THETA,
    FrequencyBand::ALPHA,
    FrequencyBand::BETA,
    FrequencyBand::GAMMA,
];

/// Index of the alpha band within [`CANONICAL_BANDS`].
pub const CANONICAL_ALPHA_INDEX: usize = 2;

#[cfg(feature = "defmt")]
impl defmt::Format for FrequencyBand {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}[{}-{}Hz]", self.band, self.low_hz, self.high_hz);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed24_8_conversion() {
        let f = Fixed24_8::from_f32(1.5);
        assert!((f.to_f32() - 1.5).abs() < 0.01);

        let f = Fixed24_8::from_f32(-2.25);
        assert!((f.to_f32() - (-2.25)).abs() < 0.01);
    }

    #[test]
    fn test_fixed24_8_saturates() {
        let big = Fixed24_8::from_raw(i32::MAX);
        assert_eq!((big + Fixed24_8::ONE).to_raw(), i32::MAX);
        assert_eq!((-Fixed24_8::from_raw(i32::MIN)).to_raw(), i32::MAX);
    }

    #[test]
    fn test_ads1299_conversion() {
        // Full-scale positive at gain 24: 8388607 * 0.536 / 24 ≈ 187 mV
        let uv = Fixed24_8::from_ads1299_raw(0x7F_FFFF, 24).to_f32();
        assert!((uv - 187_000.0).abs() < 1_000.0, "got {uv}");

        let zero = Fixed24_8::from_ads1299_raw(0, 24);
        assert_eq!(zero, Fixed24_8::ZERO);
    }

    #[test]
    fn test_channel_index_roundtrip() {
        for ch in EegChannel::ALL {
            assert_eq!(EegChannel::from_index(ch.index()), Some(ch));
        }
        assert_eq!(EegChannel::from_index(8), None);
    }

    #[test]
    fn test_contralateral() {
        for ch in EegChannel::ALL {
            assert_eq!(ch.contralateral().contralateral(), ch);
            assert_ne!(ch.is_left(), ch.contralateral().is_left());
        }
    }

    #[test]
    fn test_channel_mask() {
        let mask = ChannelMask::single(0).with(3);
        assert!(mask.contains(0));
        assert!(mask.contains(3));
        assert!(!mask.contains(1));
        assert_eq!(mask.count(), 2);
        assert!(mask.iter().eq([0, 3]));

        assert_eq!(ChannelMask::first(8).count(), 8);
        assert_eq!(ChannelMask::first(3).bits(), 0b111);
        assert!(ChannelMask::single(9).is_empty());
    }

    #[test]
    fn test_audio_frame_normalization() {
        let frame = AudioFrame::new(0, 0, i16::MIN, 16384);
        assert!((frame.to_f32(AudioChannel::Left) + 1.0).abs() < 1e-6);
        assert!((frame.to_f32(AudioChannel::Right) - 0.5).abs() < 1e-6);
        assert!((frame.to_f32(AudioChannel::Mix) + 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_canonical_bands_are_contiguous() {
        for pair in CANONICAL_BANDS.windows(2) {
            assert!((pair[0].high_hz - pair[1].low_hz).abs() < f32::EPSILON);
        }
        assert_eq!(CANONICAL_BANDS[CANONICAL_ALPHA_INDEX].band, EegBand::Alpha);
        assert!(CANONICAL_BANDS.iter().all(FrequencyBand::is_valid));
    }

    #[test]
    fn test_band_contains_edges() {
        let alpha = FrequencyBand::ALPHA;
        assert!(alpha.contains(8.0));
        assert!(alpha.contains(13.0));
        assert!(!alpha.contains(13.01));
        assert_eq!(EegBand::Custom(3).range_hz(), None);
    }
}
