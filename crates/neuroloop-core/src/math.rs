//! Math utilities for feature extraction (`no_std` compatible)
//!
//! This module provides:
//! - Window function coefficients for spectral analysis
//! - Exponential smoothing with a time constant
//! - Block statistics (mean, RMS, peak)
//!
//! Transcendental functions come from `libm` so the same code runs on targets
//! without a hardware FPU library.

use core::f32::consts::PI;

use serde::{Deserialize, Serialize};

// ============================================================================
// Window Functions
// ============================================================================

/// Window applied to a block before the forward transform.
///
/// Coefficients use the periodic (DFT-even) form with denominator `N`, so a
/// tone centered on a bin stays centered after windowing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowType {
    /// Rectangular (no weighting)
    None,
    /// Hann: `0.5 - 0.5·cos(2πn/N)`
    #[default]
    Hann,
    /// Hamming: `0.54 - 0.46·cos(2πn/N)`
    Hamming,
    /// Blackman: `0.42 - 0.5·cos(2πn/N) + 0.08·cos(4πn/N)`
    Blackman,
}

impl WindowType {
    /// Coefficient `n` of a window of length `len`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coefficient(self, n: usize, len: usize) -> f32 {
        if len <= 1 {
            return 1.0;
        }
        let phase = 2.0 * PI * n as f32 / len as f32;
        match self {
            Self::None => 1.0,
            Self::Hann => 0.5 - 0.5 * libm::cosf(phase),
            Self::Hamming => 0.54 - 0.46 * libm::cosf(phase),
            Self::Blackman => 0.42 - 0.5 * libm::cosf(phase) + 0.08 * libm::cosf(2.0 * phase),
        }
    }

    /// Fill `out` with this window's coefficients.
    pub fn fill(self, out: &mut [f32]) {
        let len = out.len();
        for (n, w) in out.iter_mut().enumerate() {
            *w = self.coefficient(n, len);
        }
    }

    /// Human-readable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Hann => "Hann",
            Self::Hamming => "Hamming",
            Self::Blackman => "Blackman",
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for WindowType {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{}", self.name());
    }
}

/// Coherent gain (mean coefficient) of a window.
///
/// Dividing a windowed amplitude by this restores the unwindowed amplitude of
/// a bin-centered tone.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn coherent_gain(window: &[f32]) -> f32 {
    if window.is_empty() {
        return 1.0;
    }
    window.iter().sum::<f32>() / window.len() as f32
}

// ============================================================================
// Exponential Smoothing
// ============================================================================

/// Smoothing factor for an exponential moving average.
///
/// `α = 1 - exp(-dt/τ)`; a non-positive `τ` disables smoothing (α = 1).
#[inline]
#[must_use]
pub fn ema_alpha(dt_s: f32, time_constant_s: f32) -> f32 {
    if time_constant_s <= 0.0 || dt_s <= 0.0 {
        return 1.0;
    }
    1.0 - libm::expf(-dt_s / time_constant_s)
}

/// Exponential moving average over a fixed number of lanes.
///
/// Implements: y\[n\] = α·x\[n\] + (1-α)·y\[n-1\], with α derived from the
/// elapsed time since the previous update. The first update seeds the state.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpSmoother<const N: usize> {
    time_constant_s: f32,
    state: [f32; N],
    seeded: bool,
}

impl<const N: usize> ExpSmoother<N> {
    /// Smoother with time constant `time_constant_s` (seconds).
    #[must_use]
    pub const fn new(time_constant_s: f32) -> Self {
        Self { time_constant_s, state: [0.0; N], seeded: false }
    }

    /// Fold `input` (first `input.len()` lanes) into the state after `dt_s`
    /// seconds and return the smoothed lanes.
    pub fn update(&mut self, input: &[f32], dt_s: f32) -> &[f32] {
        let len = input.len().min(N);
        if self.seeded {
            let alpha = ema_alpha(dt_s, self.time_constant_s);
            for (y, &x) in self.state[..len].iter_mut().zip(input) {
                *y += alpha * (x - *y);
            }
        } else {
            self.state[..len].copy_from_slice(&input[..len]);
            self.seeded = true;
        }
        &self.state[..len]
    }

    /// Current smoothed state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> &[f32; N] {
        &self.state
    }

    /// Whether at least one update has been applied.
    #[inline]
    #[must_use]
    pub const fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Forget all history; the next update reseeds.
    pub fn reset(&mut self) {
        self.state = [0.0; N];
        self.seeded = false;
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Arithmetic mean; zero for an empty block.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Root-mean-square level; zero for an empty block.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = values.iter().map(|v| v * v).sum();
    libm::sqrtf(sum_sq / values.len() as f32)
}

/// Largest absolute value; zero for an empty block.
#[must_use]
pub fn peak(values: &[f32]) -> f32 {
    values.iter().fold(0.0f32, |acc, v| acc.max(libm::fabsf(*v)))
}

/// Largest absolute difference between consecutive values.
#[must_use]
pub fn max_gradient(values: &[f32]) -> f32 {
    values.windows(2).fold(0.0f32, |acc, w| acc.max(libm::fabsf(w[1] - w[0])))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_endpoints() {
        let mut w = [0.0f32; 64];
        WindowType::Hann.fill(&mut w);
        assert!(w[0].abs() < 1e-6);
        assert!((w[32] - 1.0).abs() < 1e-6);
        // Periodic form is symmetric around N/2
        assert!((w[1] - w[63]).abs() < 1e-6);

        WindowType::None.fill(&mut w);
        assert!(w.iter().all(|&c| c == 1.0));
    }

    #[test]
    fn test_coherent_gain() {
        let mut w = [0.0f32; 256];
        for (window, expected) in [
            (WindowType::None, 1.0),
            (WindowType::Hann, 0.5),
            (WindowType::Hamming, 0.54),
            (WindowType::Blackman, 0.42),
        ] {
            window.fill(&mut w);
            assert!((coherent_gain(&w) - expected).abs() < 1e-3, "{}", window.name());
        }
    }

    #[test]
    fn test_ema_alpha() {
        assert_eq!(ema_alpha(0.5, 0.0), 1.0);
        let alpha = ema_alpha(1.0, 1.0);
        assert!((alpha - 0.632_12).abs() < 1e-4);
    }

    #[test]
    fn test_smoother_seeds_then_converges() {
        let mut s = ExpSmoother::<2>::new(1.0);
        assert_eq!(s.update(&[10.0, 20.0], 0.25), &[10.0, 20.0]);
        assert!(s.is_seeded());

        for _ in 0..200 {
            s.update(&[0.0, 0.0], 0.25);
        }
        assert!(s.state()[0].abs() < 1e-3);

        s.reset();
        assert!(!s.is_seeded());
        assert_eq!(s.update(&[3.0, 4.0], 0.25), &[3.0, 4.0]);
    }

    #[test]
    fn test_block_statistics() {
        let values = [1.0f32, -3.0, 2.0, -2.0];
        assert!((mean(&values) + 0.5).abs() < 1e-6);
        assert!((rms(&values) - libm::sqrtf(4.5)).abs() < 1e-6);
        assert_eq!(peak(&values), 3.0);
        assert_eq!(max_gradient(&values), 5.0);
        assert_eq!(rms(&[]), 0.0);
    }
}
