//! Signal processing pipelines
//!
//! This module provides feature extraction for the consumer side:
//! - [`fft`]: Windowed FFT engine and spectral frames
//! - [`eeg`]: EEG band power, asymmetry and quality features
//! - [`audio`]: Audio level, spectrum and THD features
//! - [`artifact`]: Amplitude/gradient artifact detection

pub mod artifact;
pub mod audio;
pub mod eeg;
pub mod fft;

pub use artifact::{ArtifactDetector, ArtifactReport};
pub use audio::{AudioFeatureRecord, AudioProcessor};
pub use eeg::{BandPowers, EegProcessor, FeatureFlags, FeatureRecord};
pub use fft::{FftEngine, OverlapConfig, SpectralFrame};
