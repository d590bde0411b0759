//! FFT engine for spectral analysis
//!
//! Windows a real-valued block, runs a forward transform and exposes the
//! non-negative-frequency half of the spectrum. The transform plan, window
//! coefficients and scratch buffers are built once in [`FftEngine::init`];
//! the `*_into` methods do not allocate.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use neuroloop_core::math::{self, WindowType};

use crate::error::{ConfigError, ProcessingError, ProcessingResult};

/// Smallest supported transform size
pub const MIN_FFT_SIZE: usize = 64;

/// Largest supported transform size
pub const MAX_FFT_SIZE: usize = 4096;

/// Whether `size` is a supported transform size.
#[must_use]
pub const fn is_supported_size(size: usize) -> bool {
    size.is_power_of_two() && size >= MIN_FFT_SIZE && size <= MAX_FFT_SIZE
}

/// Frequency of bin `bin_index` for a transform of `size` at `sample_rate`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bin_to_frequency(bin_index: usize, size: usize, sample_rate: f32) -> f32 {
    bin_index as f32 * sample_rate / size as f32
}

// ============================================================================
// Overlap
// ============================================================================

/// Overlap between successive analysis windows.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OverlapConfig {
    /// Fraction of each window shared with the next, in [0, 1)
    pub fraction: f32,
}

impl OverlapConfig {
    /// Back-to-back windows
    pub const NONE: Self = Self { fraction: 0.0 };
    /// 50% overlap
    pub const HALF: Self = Self { fraction: 0.5 };

    /// Samples between the starts of successive windows of length `size`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn hop_size(&self, size: usize) -> usize {
        let hop = (size as f32 * (1.0 - self.fraction)).round() as usize;
        hop.clamp(1, size.max(1))
    }

    /// Check the fraction range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] unless `0 <= fraction < 1`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (0.0..1.0).contains(&self.fraction) {
            Ok(())
        } else {
            Err(ConfigError::OutOfRange { field: "overlap.fraction", reason: "must be in [0, 1)" })
        }
    }
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self::NONE
    }
}

// ============================================================================
// Spectral Frame
// ============================================================================

/// Output of one forward transform: bins `0..N/2`, from 0 Hz upward.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralFrame {
    bins: Vec<Complex<f32>>,
    fft_size: usize,
    sample_rate: f32,
}

impl SpectralFrame {
    /// Complex bins
    #[must_use]
    pub fn bins(&self) -> &[Complex<f32>] {
        &self.bins
    }

    /// Number of bins (`fft_size / 2`)
    #[must_use]
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Whether the frame has no bins
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Transform size the frame was computed with
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Sample rate of the input block
    #[must_use]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Center frequency of bin `bin_index`
    #[must_use]
    pub fn bin_frequency(&self, bin_index: usize) -> f32 {
        bin_to_frequency(bin_index, self.fft_size, self.sample_rate)
    }

    /// Magnitude of every bin
    #[must_use]
    pub fn magnitudes(&self) -> Vec<f32> {
        FftEngine::magnitude(&self.bins)
    }

    /// Index of the strongest bin, skipping DC
    #[must_use]
    pub fn peak_bin(&self) -> Option<usize> {
        self.bins
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|(_, a), (_, b)| a.norm_sqr().total_cmp(&b.norm_sqr()))
            .map(|(i, _)| i)
    }
}

// ============================================================================
// FFT Engine
// ============================================================================

/// Windowed forward real FFT of a fixed size.
pub struct FftEngine {
    size: usize,
    sample_rate: f32,
    window_type: WindowType,
    overlap: OverlapConfig,
    window: Vec<f32>,
    coherent_gain: f32,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl std::fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftEngine")
            .field("size", &self.size)
            .field("sample_rate", &self.sample_rate)
            .field("window_type", &self.window_type)
            .field("overlap", &self.overlap)
            .finish_non_exhaustive()
    }
}

impl FftEngine {
    /// Create an engine for blocks of `size` samples at `sample_rate` Hz.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::UnsupportedFftSize`] unless `size` is a power
    /// of two in `64..=4096`, and [`ProcessingError::InvalidParam`] for a
    /// non-positive sample rate or an invalid overlap.
    pub fn init(
        size: usize,
        window_type: WindowType,
        sample_rate: f32,
        overlap: OverlapConfig,
    ) -> ProcessingResult<Self> {
        if !is_supported_size(size) {
            return Err(ProcessingError::UnsupportedFftSize { size, min: MIN_FFT_SIZE, max: MAX_FFT_SIZE });
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(ProcessingError::InvalidParam { reason: "sample rate must be positive" });
        }
        overlap.validate()?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        let mut window = vec![0.0; size];
        window_type.fill(&mut window);
        let coherent_gain = math::coherent_gain(&window);

        Ok(Self {
            size,
            sample_rate,
            window_type,
            overlap,
            window,
            coherent_gain,
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch: vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()],
            fft,
        })
    }

    /// Transform `input` and return a new [`SpectralFrame`].
    ///
    /// `input` is windowed in the engine's own buffer; the caller's slice is
    /// never modified.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::SizeMismatch`] if `input.len()` differs
    /// from the engine size.
    pub fn forward(&mut self, input: &[f32]) -> ProcessingResult<SpectralFrame> {
        let mut bins = vec![Complex::new(0.0, 0.0); self.bin_count()];
        self.forward_into(input, &mut bins)?;
        Ok(SpectralFrame { bins, fft_size: self.size, sample_rate: self.sample_rate })
    }

    /// Transform `input` into `out` (length `size / 2`) without allocating.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::SizeMismatch`] if either slice has the wrong length.
    pub fn forward_into(&mut self, input: &[f32], out: &mut [Complex<f32>]) -> ProcessingResult<()> {
        self.transform(input)?;
        if out.len() != self.bin_count() {
            return Err(ProcessingError::SizeMismatch { expected: self.bin_count(), got: out.len() });
        }
        out.copy_from_slice(&self.buffer[..self.bin_count()]);
        Ok(())
    }

    /// Power spectrum `|X[k]|² / N²` of `input` into `out` (length `size / 2`).
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::SizeMismatch`] if either slice has the wrong length.
    #[allow(clippy::cast_precision_loss)]
    pub fn power_spectrum_into(&mut self, input: &[f32], out: &mut [f32]) -> ProcessingResult<()> {
        self.transform(input)?;
        if out.len() != self.bin_count() {
            return Err(ProcessingError::SizeMismatch { expected: self.bin_count(), got: out.len() });
        }

        let norm = 1.0 / (self.size as f32 * self.size as f32);
        for (p, c) in out.iter_mut().zip(&self.buffer) {
            *p = c.norm_sqr() * norm;
        }
        Ok(())
    }

    fn transform(&mut self, input: &[f32]) -> ProcessingResult<()> {
        if input.len() != self.size {
            return Err(ProcessingError::SizeMismatch { expected: self.size, got: input.len() });
        }

        for ((dst, &s), &w) in self.buffer.iter_mut().zip(input).zip(&self.window) {
            *dst = Complex::new(s * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        Ok(())
    }

    /// Elementwise `sqrt(re² + im²)`.
    #[must_use]
    pub fn magnitude(spectrum: &[Complex<f32>]) -> Vec<f32> {
        spectrum.iter().map(|c| c.norm()).collect()
    }

    /// Elementwise magnitude into `out`; extra elements on either side are ignored.
    pub fn magnitude_into(spectrum: &[Complex<f32>], out: &mut [f32]) {
        for (m, c) in out.iter_mut().zip(spectrum) {
            *m = c.norm();
        }
    }

    /// Center frequency of bin `bin_index` for this engine.
    #[must_use]
    pub fn bin_to_frequency(&self, bin_index: usize) -> f32 {
        bin_to_frequency(bin_index, self.size, self.sample_rate)
    }

    /// Hz per bin
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn frequency_resolution(&self) -> f32 {
        self.sample_rate / self.size as f32
    }

    /// Transform size
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of output bins (`size / 2`)
    #[must_use]
    pub fn bin_count(&self) -> usize {
        self.size / 2
    }

    /// Input sample rate
    #[must_use]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Window applied before the transform
    #[must_use]
    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    /// Precomputed window coefficients
    #[must_use]
    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Mean window coefficient, for amplitude correction
    #[must_use]
    pub fn coherent_gain(&self) -> f32 {
        self.coherent_gain
    }

    /// Samples between successive analysis windows
    #[must_use]
    pub fn hop_size(&self) -> usize {
        self.overlap.hop_size(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[allow(clippy::cast_precision_loss)]
    fn sine(freq: f32, sample_rate: f32, len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn test_supported_sizes() {
        for size in [64, 128, 512, 4096] {
            assert!(FftEngine::init(size, WindowType::Hann, 512.0, OverlapConfig::NONE).is_ok());
        }
        for size in [0, 32, 100, 8192] {
            assert!(matches!(
                FftEngine::init(size, WindowType::Hann, 512.0, OverlapConfig::NONE),
                Err(ProcessingError::UnsupportedFftSize { .. })
            ));
        }
        assert!(FftEngine::init(256, WindowType::Hann, 0.0, OverlapConfig::NONE).is_err());
    }

    #[test]
    fn test_bin_aligned_peak() {
        for window in [WindowType::None, WindowType::Hann, WindowType::Hamming, WindowType::Blackman] {
            let mut engine = FftEngine::init(256, window, 256.0, OverlapConfig::NONE).unwrap();
            let input = sine(bin_to_frequency(20, 256, 256.0), 256.0, 256, 1.0);
            let frame = engine.forward(&input).unwrap();

            assert_eq!(frame.len(), 128);
            let peak = frame.peak_bin().unwrap();
            assert!(peak.abs_diff(20) <= 1, "{}: peak at {peak}", window.name());
        }
    }

    #[test]
    fn test_size_mismatch_is_reported() {
        let mut engine = FftEngine::init(128, WindowType::Hann, 250.0, OverlapConfig::NONE).unwrap();
        assert_eq!(
            engine.forward(&[0.0; 100]).unwrap_err(),
            ProcessingError::SizeMismatch { expected: 128, got: 100 }
        );

        let mut out = vec![0.0; 10];
        assert!(engine.power_spectrum_into(&[0.0; 128], &mut out).is_err());
    }

    #[test]
    fn test_input_not_mutated() {
        let mut engine = FftEngine::init(64, WindowType::Blackman, 64.0, OverlapConfig::NONE).unwrap();
        let input = vec![1.0f32; 64];
        let copy = input.clone();
        engine.forward(&input).unwrap();
        assert_eq!(input, copy);
    }

    #[test]
    fn test_power_normalization() {
        // Unit sine at bin 16, Hann: |X| = N/2 * 0.5, power = 1/16
        let mut engine = FftEngine::init(512, WindowType::Hann, 512.0, OverlapConfig::NONE).unwrap();
        let input = sine(16.0, 512.0, 512, 1.0);
        let mut power = vec![0.0; 256];
        engine.power_spectrum_into(&input, &mut power).unwrap();

        assert!((power[16] - 1.0 / 16.0).abs() < 1e-3);
        assert!(power[40] < 1e-8);
    }

    #[test]
    fn test_magnitude_and_frequency_helpers() {
        let spectrum = [Complex::new(3.0f32, 4.0), Complex::new(0.0, -2.0)];
        assert_eq!(FftEngine::magnitude(&spectrum), vec![5.0, 2.0]);

        let engine = FftEngine::init(512, WindowType::Hann, 256.0, OverlapConfig::HALF).unwrap();
        assert!((engine.frequency_resolution() - 0.5).abs() < f32::EPSILON);
        assert!((engine.bin_to_frequency(20) - 10.0).abs() < f32::EPSILON);
        assert_eq!(engine.hop_size(), 256);
        assert!((engine.coherent_gain() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_overlap_validation() {
        assert!(OverlapConfig { fraction: 1.0 }.validate().is_err());
        assert!(OverlapConfig { fraction: -0.1 }.validate().is_err());
        assert_eq!(OverlapConfig { fraction: 0.75 }.hop_size(256), 64);
        assert_eq!(OverlapConfig { fraction: 0.999 }.hop_size(64), 1);
    }
}
