//! Audio feature extraction
//!
//! Computes level (RMS, peak), the magnitude spectrum and total harmonic
//! distortion of one block of stereo frames. THD is the amplitude ratio
//! `sqrt(Σ harmonic energy / fundamental energy)`, with each tone's energy
//! taken over its center bin and both neighbors so window leakage is
//! counted for every tone alike.

use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use neuroloop_core::math;
use neuroloop_core::types::{AudioFrame, Timestamp};

use super::fft::FftEngine;
use crate::config::AudioConfig;
use crate::error::{ProcessingError, ProcessingResult};

/// Features of one processed audio block
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatureRecord {
    /// Timestamp of the last frame in the block (µs)
    pub timestamp_us: Timestamp,
    /// Magnitude spectrum, bins `0..N/2`
    pub spectrum: Vec<f32>,
    /// Total harmonic distortion as a ratio (0.01 = 1%)
    pub thd: f32,
    /// RMS level, full scale = 1.0
    pub rms: f32,
    /// Peak absolute level, full scale = 1.0
    pub peak: f32,
    /// Fundamental used for THD (Hz)
    pub fundamental_hz: f32,
}

impl AudioFeatureRecord {
    /// THD in percent
    #[must_use]
    pub fn thd_percent(&self) -> f32 {
        self.thd * 100.0
    }

    /// RMS level in dBFS; `-inf` for silence
    #[must_use]
    pub fn rms_dbfs(&self) -> f32 {
        20.0 * self.rms.log10()
    }
}

/// Per-block audio feature extractor
#[derive(Debug)]
pub struct AudioProcessor {
    config: AudioConfig,
    fft: FftEngine,
    samples: Vec<f32>,
    bins: Vec<Complex<f32>>,
}

impl AudioProcessor {
    /// Create a processor.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::Config`] if the configuration is invalid.
    pub fn new(config: AudioConfig) -> ProcessingResult<Self> {
        config.validate()?;
        let fft = FftEngine::init(config.block_size, config.window, config.sample_rate_hz, config.overlap)?;

        tracing::info!(
            sample_rate_hz = config.sample_rate_hz,
            block = config.block_size,
            channel = ?config.channel,
            "audio processor ready"
        );

        Ok(Self {
            samples: vec![0.0; config.block_size],
            bins: vec![Complex::new(0.0, 0.0); fft.bin_count()],
            fft,
            config,
        })
    }

    /// Extract features from one block of exactly `block_size` frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::SizeMismatch`] for a partial block.
    pub fn process_block(&mut self, frames: &[AudioFrame]) -> ProcessingResult<AudioFeatureRecord> {
        if frames.len() != self.config.block_size {
            return Err(ProcessingError::SizeMismatch { expected: self.config.block_size, got: frames.len() });
        }

        for (dst, frame) in self.samples.iter_mut().zip(frames) {
            *dst = frame.to_f32(self.config.channel);
        }
        let rms = math::rms(&self.samples);
        let peak = math::peak(&self.samples);

        self.fft.forward_into(&self.samples, &mut self.bins)?;
        let spectrum = FftEngine::magnitude(&self.bins);

        let fundamental_bin = self.fundamental_bin(&spectrum);
        let thd = fundamental_bin.map_or(0.0, |k| self.thd(k));
        let fundamental_hz = self
            .config
            .fundamental_hz
            .unwrap_or_else(|| fundamental_bin.map_or(0.0, |k| self.fft.bin_to_frequency(k)));

        let timestamp_us = frames[frames.len() - 1].timestamp_us;
        tracing::trace!(timestamp_us, rms, thd, "audio block processed");

        Ok(AudioFeatureRecord { timestamp_us, spectrum, thd, rms, peak, fundamental_hz })
    }

    /// Configured fundamental's bin, or the strongest non-DC bin.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn fundamental_bin(&self, spectrum: &[f32]) -> Option<usize> {
        match self.config.fundamental_hz {
            Some(f) => {
                let k = (f / self.fft.frequency_resolution()).round() as usize;
                (k > 0 && k < spectrum.len()).then_some(k)
            }
            None => spectrum
                .iter()
                .enumerate()
                .skip(1)
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .filter(|(_, m)| **m > 0.0)
                .map(|(k, _)| k),
        }
    }

    /// Harmonic-to-fundamental ratio, each tone taken as its bin plus the
    /// immediate neighbors.
    ///
    /// Every bin is counted at most once: for low fundamentals the
    /// neighborhoods overlap, and a bin already claimed by the fundamental or
    /// a lower harmonic is left out of the next one.
    fn thd(&self, fundamental_bin: usize) -> f32 {
        let last = self.bins.len() - 1;
        let end = (fundamental_bin + 1).min(last);
        let fundamental = self.energy(fundamental_bin.saturating_sub(1).max(1), end);
        if fundamental <= 0.0 {
            return 0.0;
        }

        let mut next_free = end + 1;
        let mut harmonics = 0.0;
        for k in (2..=self.config.harmonics + 1).map(|h| h * fundamental_bin).take_while(|&k| k <= last) {
            let start = k.saturating_sub(1).max(next_free);
            let end = (k + 1).min(last);
            if start <= end {
                harmonics += self.energy(start, end);
                next_free = end + 1;
            }
        }

        (harmonics / fundamental).sqrt()
    }

    /// Energy of bins `start..=end`.
    fn energy(&self, start: usize, end: usize) -> f32 {
        self.bins[start..=end].iter().map(Complex::norm_sqr).sum()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// The FFT engine sized for this processor
    #[must_use]
    pub fn fft(&self) -> &FftEngine {
        &self.fft
    }

    /// Frames per block
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.config.block_size
    }
}
