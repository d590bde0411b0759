//! Pipeline configuration
//!
//! Every tunable is supplied by the caller at construction time. The structs
//! here derive `serde` so hosts can load them from whatever format they use;
//! this crate itself never touches files or the environment.

use heapless::Vec as BandVec;
use serde::{Deserialize, Serialize};

use neuroloop_core::math::WindowType;
use neuroloop_core::time_sync::{DriftConfig, SLEW_GUARD_US};
use neuroloop_core::types::{
    AudioChannel, EegChannel, FrequencyBand, CANONICAL_ALPHA_INDEX, CANONICAL_BANDS, MAX_BANDS,
    MAX_EEG_CHANNELS,
};

use crate::error::ConfigError;
use crate::processing::fft::{is_supported_size, OverlapConfig};

/// Ordered band set used for band-power integration
pub type BandSet = BandVec<FrequencyBand, MAX_BANDS>;

/// The five canonical EEG bands as a [`BandSet`]
#[must_use]
pub fn canonical_bands() -> BandSet {
    CANONICAL_BANDS.iter().copied().collect()
}

// ============================================================================
// Artifact Thresholds
// ============================================================================

/// Amplitude and gradient limits for artifact flagging.
///
/// Both are unset by default, which disables artifact detection; suitable
/// values depend on montage, gain and subject.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactThresholds {
    /// Absolute amplitude limit (µV)
    pub amplitude_uv: Option<f32>,
    /// Sample-to-sample change limit (µV)
    pub gradient_uv: Option<f32>,
}

impl ArtifactThresholds {
    /// Whether any threshold is set
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.amplitude_uv.is_some() || self.gradient_uv.is_some()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("artifact.amplitude_uv", self.amplitude_uv),
            ("artifact.gradient_uv", self.gradient_uv),
        ] {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    return Err(ConfigError::OutOfRange { field, reason: "must be positive" });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// EEG Configuration
// ============================================================================

/// EEG feature processor configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EegConfig {
    /// Sample rate (Hz)
    pub sample_rate_hz: f32,
    /// Channels delivered per sample
    pub channel_count: usize,
    /// Samples per analysis window (FFT size)
    pub window_size: usize,
    /// Window function
    pub window: WindowType,
    /// Overlap between successive windows
    pub overlap: OverlapConfig,
    /// Bands to integrate, in output order
    pub bands: BandSet,
    /// Left channel of the asymmetry pair
    pub asymmetry_left: EegChannel,
    /// Right channel of the asymmetry pair
    pub asymmetry_right: EegChannel,
    /// Index into `bands` of the band used for asymmetry
    pub asymmetry_band: usize,
    /// Band power smoothing time constant (s); 0 disables smoothing
    pub smoothing_time_constant_s: f32,
    /// Artifact flagging thresholds
    pub artifact: ArtifactThresholds,
    /// Quality below which records are flagged low quality (0-100)
    pub quality_floor: u8,
}

impl Default for EegConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 250.0,
            channel_count: MAX_EEG_CHANNELS,
            window_size: 256,
            window: WindowType::Hann,
            overlap: OverlapConfig::HALF,
            bands: canonical_bands(),
            asymmetry_left: EegChannel::F3,
            asymmetry_right: EegChannel::F4,
            asymmetry_band: CANONICAL_ALPHA_INDEX,
            smoothing_time_constant_s: 1.0,
            artifact: ArtifactThresholds::default(),
            quality_floor: 50,
        }
    }
}

impl EegConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(ConfigError::OutOfRange { field: "eeg.sample_rate_hz", reason: "must be positive" });
        }
        if self.channel_count == 0 || self.channel_count > MAX_EEG_CHANNELS {
            return Err(ConfigError::OutOfRange { field: "eeg.channel_count", reason: "must be 1..=8" });
        }
        if !is_supported_size(self.window_size) {
            return Err(ConfigError::OutOfRange {
                field: "eeg.window_size",
                reason: "must be a power of two in 64..=4096",
            });
        }
        self.overlap.validate()?;

        if self.bands.is_empty() {
            return Err(ConfigError::OutOfRange { field: "eeg.bands", reason: "at least one band required" });
        }
        for (index, band) in self.bands.iter().enumerate() {
            if !band.is_valid() {
                return Err(ConfigError::InvalidBand { index, low_hz: band.low_hz, high_hz: band.high_hz });
            }
        }
        if self.asymmetry_band >= self.bands.len() {
            return Err(ConfigError::OutOfRange { field: "eeg.asymmetry_band", reason: "must index eeg.bands" });
        }
        if self.asymmetry_left.index() >= self.channel_count
            || self.asymmetry_right.index() >= self.channel_count
        {
            return Err(ConfigError::OutOfRange {
                field: "eeg.asymmetry_left/right",
                reason: "must be below channel_count",
            });
        }
        if !(self.smoothing_time_constant_s.is_finite() && self.smoothing_time_constant_s >= 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "eeg.smoothing_time_constant_s",
                reason: "must be non-negative",
            });
        }
        if self.quality_floor > 100 {
            return Err(ConfigError::OutOfRange { field: "eeg.quality_floor", reason: "must be 0..=100" });
        }
        self.artifact.validate()
    }

    /// Samples between successive windows
    #[must_use]
    pub fn hop_size(&self) -> usize {
        self.overlap.hop_size(self.window_size)
    }
}

// ============================================================================
// Audio Configuration
// ============================================================================

/// Audio feature processor configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate (Hz)
    pub sample_rate_hz: f32,
    /// Frames per analysis block (FFT size)
    pub block_size: usize,
    /// Window function
    pub window: WindowType,
    /// Overlap between successive blocks
    pub overlap: OverlapConfig,
    /// Which part of the stereo frame to analyze
    pub channel: AudioChannel,
    /// Known fundamental (Hz); detected from the spectrum when unset
    pub fundamental_hz: Option<f32>,
    /// Harmonics (2nd, 3rd, ...) included in THD
    pub harmonics: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 48_000.0,
            block_size: 2048,
            window: WindowType::Hann,
            overlap: OverlapConfig::NONE,
            channel: AudioChannel::Mix,
            fundamental_hz: None,
            harmonics: 5,
        }
    }
}

impl AudioConfig {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(ConfigError::OutOfRange { field: "audio.sample_rate_hz", reason: "must be positive" });
        }
        if !is_supported_size(self.block_size) {
            return Err(ConfigError::OutOfRange {
                field: "audio.block_size",
                reason: "must be a power of two in 64..=4096",
            });
        }
        self.overlap.validate()?;
        if let Some(f) = self.fundamental_hz {
            if !(f.is_finite() && f > 0.0 && f < self.sample_rate_hz / 2.0) {
                return Err(ConfigError::OutOfRange {
                    field: "audio.fundamental_hz",
                    reason: "must be between 0 and Nyquist",
                });
            }
        }
        if self.harmonics == 0 {
            return Err(ConfigError::OutOfRange { field: "audio.harmonics", reason: "must be at least 1" });
        }
        Ok(())
    }
}

// ============================================================================
// Buffer and Pipeline Configuration
// ============================================================================

/// Ring buffer capacities (slots; one is always kept free)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// EEG sample ring capacity
    pub eeg_capacity: usize,
    /// Audio frame ring capacity
    pub audio_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { eeg_capacity: 1024, audio_capacity: 8192 }
    }
}

impl BufferConfig {
    /// Check both capacities.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CapacityNotPowerOfTwo`] for a bad capacity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, capacity) in [("buffers.eeg", self.eeg_capacity), ("buffers.audio", self.audio_capacity)] {
            if !capacity.is_power_of_two() {
                return Err(ConfigError::CapacityNotPowerOfTwo { field, capacity });
            }
        }
        Ok(())
    }
}

/// Complete pipeline configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// EEG processing
    pub eeg: EegConfig,
    /// Audio processing
    pub audio: AudioConfig,
    /// Ring buffer sizes
    pub buffers: BufferConfig,
    /// Drift correction tuning
    pub drift: DriftConfig,
    /// Per-window processing deadline (µs); overruns are logged, not aborted
    #[serde(default = "default_deadline_us")]
    pub deadline_us: u64,
    /// Interval between drift corrections (µs)
    #[serde(default = "default_drift_interval_us")]
    pub drift_interval_us: u64,
}

fn default_deadline_us() -> u64 {
    20_000
}

fn default_drift_interval_us() -> u64 {
    1_000_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            eeg: EegConfig::default(),
            audio: AudioConfig::default(),
            buffers: BufferConfig::default(),
            drift: DriftConfig::default(),
            deadline_us: default_deadline_us(),
            drift_interval_us: default_drift_interval_us(),
        }
    }
}

impl PipelineConfig {
    /// Check the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.eeg.validate()?;
        self.audio.validate()?;
        self.buffers.validate()?;
        if self.drift.validate().is_err() {
            return Err(ConfigError::OutOfRange {
                field: "drift",
                reason: "max_step_us must be non-zero, gain in (0, 1] and slew_us at least max_step_us",
            });
        }
        if self.deadline_us == 0 {
            return Err(ConfigError::OutOfRange { field: "deadline_us", reason: "must be non-zero" });
        }
        if self.drift_interval_us <= u64::from(self.drift.slew_us) + SLEW_GUARD_US {
            return Err(ConfigError::OutOfRange {
                field: "drift_interval_us",
                reason: "must be longer than drift.slew_us",
            });
        }
        Ok(())
    }
}
