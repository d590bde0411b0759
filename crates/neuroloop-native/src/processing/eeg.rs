//! EEG feature extraction
//!
//! Turns a fixed-length window of multi-channel samples into a
//! [`FeatureRecord`]: smoothed band powers averaged over the selected
//! channels, frontal asymmetry, total power and an aggregate quality score.
//!
//! Band power for `[low_hz, high_hz]` is the mean of `|X[k]|² / N²` over the
//! bins whose center frequency lies inside the band, edges inclusive.

use heapless::Vec as BandVec;
use serde::{Deserialize, Serialize};

use neuroloop_core::math::ExpSmoother;
use neuroloop_core::time_sync::diff;
use neuroloop_core::types::{
    ChannelMask, EegChannel, EegSample, FrequencyBand, Timestamp, MAX_BANDS, MAX_EEG_CHANNELS,
};

use super::artifact::{ArtifactDetector, ArtifactReport};
use super::fft::FftEngine;
use crate::config::EegConfig;
use crate::error::{ProcessingError, ProcessingResult};

/// Band power values in configuration order
pub type BandPowers = BandVec<f32, MAX_BANDS>;

// ============================================================================
// Feature Record
// ============================================================================

/// Conditions surfaced alongside a successful record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Quality fell below the configured floor
    pub low_quality: bool,
    /// Artifact thresholds were exceeded somewhere in the window
    pub artifact: bool,
}

/// Features of one processed EEG window
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Timestamp of the last sample in the window (µs)
    pub timestamp_us: Timestamp,
    /// Smoothed band powers (µV²) in configuration order
    pub band_powers: BandPowers,
    /// Left minus right power in the asymmetry band (µV²)
    pub alpha_asymmetry: f32,
    /// Sum of `band_powers`
    pub total_power: f32,
    /// Aggregate signal quality, 0-100
    pub quality: u8,
    /// Quality and artifact flags
    pub flags: FeatureFlags,
}

impl FeatureRecord {
    /// Power of band `index`, if configured
    #[must_use]
    pub fn band_power(&self, index: usize) -> Option<f32> {
        self.band_powers.get(index).copied()
    }

    /// Band powers as fractions of `total_power`
    #[must_use]
    pub fn relative_band_powers(&self) -> BandPowers {
        relative(&self.band_powers, self.total_power)
    }

    /// Whether the record passed the quality floor
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.flags.low_quality
    }
}

fn relative(powers: &[f32], total: f32) -> BandPowers {
    if total > 0.0 {
        powers.iter().map(|p| p / total).collect()
    } else {
        powers.iter().map(|_| 0.0).collect()
    }
}

// ============================================================================
// EEG Processor
// ============================================================================

/// Per-window EEG band power extractor.
///
/// Not reentrant; lives in the consumer (main loop) context.
#[derive(Debug)]
pub struct EegProcessor {
    config: EegConfig,
    fft: FftEngine,
    detector: ArtifactDetector,
    /// Inclusive bin range of each band, `None` if no bin falls inside
    band_bins: BandVec<Option<(usize, usize)>, MAX_BANDS>,
    channel_buf: Vec<f32>,
    power_buf: Vec<f32>,
    channel_powers: [[f32; MAX_BANDS]; MAX_EEG_CHANNELS],
    smoother: ExpSmoother<MAX_BANDS>,
    smoothed: BandPowers,
    last_timestamp: Option<Timestamp>,
    last_report: ArtifactReport,
}

impl EegProcessor {
    /// Processor with default bands and windowing for `channel_count`
    /// channels at `sample_rate_hz`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::Config`] for a channel count outside 1..=8
    /// or an unusable sample rate.
    pub fn new(sample_rate_hz: f32, channel_count: usize) -> ProcessingResult<Self> {
        let mut config = EegConfig { sample_rate_hz, channel_count, ..EegConfig::default() };
        // Keep the default asymmetry pair only if the montage has it
        if config.asymmetry_right.index() >= channel_count {
            config.asymmetry_left = EegChannel::Fp1;
            config.asymmetry_right = if channel_count > 1 { EegChannel::Fp2 } else { EegChannel::Fp1 };
        }
        Self::from_config(config)
    }

    /// Processor for a complete configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::Config`] if the configuration is invalid.
    pub fn from_config(config: EegConfig) -> ProcessingResult<Self> {
        config.validate()?;

        let fft = FftEngine::init(config.window_size, config.window, config.sample_rate_hz, config.overlap)?;
        let band_bins = config.bands.iter().map(|band| bin_range(&fft, band)).collect();

        tracing::info!(
            sample_rate_hz = config.sample_rate_hz,
            channels = config.channel_count,
            window = config.window_size,
            bands = config.bands.len(),
            "EEG processor ready"
        );

        Ok(Self {
            detector: ArtifactDetector::new(config.artifact),
            smoother: ExpSmoother::new(config.smoothing_time_constant_s),
            channel_buf: vec![0.0; config.window_size],
            power_buf: vec![0.0; fft.bin_count()],
            channel_powers: [[0.0; MAX_BANDS]; MAX_EEG_CHANNELS],
            smoothed: BandPowers::new(),
            last_timestamp: None,
            last_report: ArtifactReport::default(),
            band_bins,
            fft,
            config,
        })
    }

    /// Check a channel selection against the configured channel count.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::InvalidParam`] for an empty selection and
    /// [`ProcessingError::ChannelOutOfRange`] for the first channel beyond
    /// `channel_count`.
    pub fn check_channels(&self, channels: ChannelMask) -> ProcessingResult<()> {
        if channels.is_empty() {
            return Err(ProcessingError::InvalidParam { reason: "no channels selected" });
        }
        match channels.iter().find(|&ch| ch >= self.config.channel_count) {
            Some(channel) => Err(ProcessingError::ChannelOutOfRange { channel, count: self.config.channel_count }),
            None => Ok(()),
        }
    }

    /// Extract features from one window.
    ///
    /// `samples` must hold exactly `window_size` samples in time order;
    /// `channels` selects the channels averaged into the band powers.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::SizeMismatch`] for a partial window,
    /// [`ProcessingError::InvalidParam`] for an empty selection and
    /// [`ProcessingError::ChannelOutOfRange`] for a channel beyond
    /// `channel_count`. Low quality and artifacts are reported in the
    /// record, not as errors.
    pub fn process_window(
        &mut self,
        samples: &[EegSample],
        channels: ChannelMask,
    ) -> ProcessingResult<FeatureRecord> {
        if samples.len() != self.config.window_size {
            return Err(ProcessingError::SizeMismatch { expected: self.config.window_size, got: samples.len() });
        }
        self.check_channels(channels)?;

        let report = self.detector.scan(samples, channels);

        let asym_left = self.config.asymmetry_left.index();
        let asym_right = self.config.asymmetry_right.index();
        let analyzed = channels.with(asym_left).with(asym_right);
        for ch in analyzed.iter() {
            self.analyze_channel(samples, ch)?;
        }

        let band_count = self.config.bands.len();
        let mut raw = [0.0f32; MAX_BANDS];
        #[allow(clippy::cast_precision_loss)]
        let selected = channels.count() as f32;
        for ch in channels.iter() {
            for (acc, p) in raw[..band_count].iter_mut().zip(&self.channel_powers[ch]) {
                *acc += p / selected;
            }
        }

        let band = self.config.asymmetry_band;
        let alpha_asymmetry = self.channel_powers[asym_left][band] - self.channel_powers[asym_right][band];

        let timestamp_us = samples[samples.len() - 1].timestamp_us;
        #[allow(clippy::cast_precision_loss)]
        let dt_s = self.last_timestamp.map_or(0.0, |prev| diff(timestamp_us, prev) as f32 * 1e-6);
        self.smoothed = self.smoother.update(&raw[..band_count], dt_s).iter().copied().collect();
        self.last_timestamp = Some(timestamp_us);

        let total_power: f32 = self.smoothed.iter().sum();
        let quality = aggregate_quality(samples, channels, &report);
        let flags = FeatureFlags {
            low_quality: quality < self.config.quality_floor,
            artifact: !report.is_clean(),
        };
        self.last_report = report;

        if flags.low_quality || flags.artifact {
            tracing::debug!(timestamp_us, quality, artifact_samples = report.flagged_samples, "window flagged");
        } else {
            tracing::trace!(timestamp_us, total_power, "window processed");
        }

        Ok(FeatureRecord {
            timestamp_us,
            band_powers: self.smoothed.clone(),
            alpha_asymmetry,
            total_power,
            quality,
            flags,
        })
    }

    /// Compute band powers of one channel into `channel_powers`.
    fn analyze_channel(&mut self, samples: &[EegSample], ch: usize) -> ProcessingResult<()> {
        for (dst, sample) in self.channel_buf.iter_mut().zip(samples) {
            *dst = sample.channel_uv(ch);
        }
        self.fft.power_spectrum_into(&self.channel_buf, &mut self.power_buf)?;

        for (out, bins) in self.channel_powers[ch].iter_mut().zip(&self.band_bins) {
            *out = match *bins {
                #[allow(clippy::cast_precision_loss)]
                Some((start, end)) => {
                    self.power_buf[start..=end].iter().sum::<f32>() / (end - start + 1) as f32
                }
                None => 0.0,
            };
        }
        Ok(())
    }

    /// Latest smoothed band powers, in configuration order
    #[must_use]
    pub fn get_band_powers(&self) -> &[f32] {
        &self.smoothed
    }

    /// Unsmoothed band powers of `channel` from the most recent window that
    /// analyzed it
    #[must_use]
    pub fn channel_band_powers(&self, channel: EegChannel) -> &[f32] {
        &self.channel_powers[channel.index()][..self.config.bands.len()]
    }

    /// Latest smoothed band powers as fractions of their sum
    #[must_use]
    pub fn relative_band_powers(&self) -> BandPowers {
        relative(&self.smoothed, self.smoothed.iter().sum())
    }

    /// Artifact counts from the last window
    #[must_use]
    pub fn last_artifact_report(&self) -> &ArtifactReport {
        &self.last_report
    }

    /// Drop smoothing history; the next window starts fresh.
    pub fn reset_smoothing(&mut self) {
        self.smoother.reset();
        self.smoothed.clear();
        self.last_timestamp = None;
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &EegConfig {
        &self.config
    }

    /// The FFT engine sized for this processor
    #[must_use]
    pub fn fft(&self) -> &FftEngine {
        &self.fft
    }

    /// Samples per window
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.config.window_size
    }
}

/// Inclusive range of bins whose center frequency lies in `band`.
fn bin_range(fft: &FftEngine, band: &FrequencyBand) -> Option<(usize, usize)> {
    let mut inside = (0..fft.bin_count()).filter(|&k| band.contains(fft.bin_to_frequency(k)));
    let start = inside.next()?;
    let end = inside.last().unwrap_or(start);
    Some((start, end))
}

/// Mean per-sample quality on the selected channels, scaled down by the
/// fraction of samples flagged as artifacts.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn aggregate_quality(samples: &[EegSample], channels: ChannelMask, report: &ArtifactReport) -> u8 {
    let mut sum = 0u64;
    for sample in samples {
        for ch in channels.iter() {
            sum += u64::from(sample.quality[ch]);
        }
    }
    let count = (samples.len() * channels.count()) as u64;
    if count == 0 {
        return 0;
    }
    let mean = sum as f32 / count as f32;
    (mean * (1.0 - report.fraction())).round().clamp(0.0, 100.0) as u8
}
