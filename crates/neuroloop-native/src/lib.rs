//! Neuroloop Native - Consumer-side feature extraction and pipeline wiring
//!
//! This crate provides the hosted processing tier on top of `neuroloop-core`:
//! - Windowed FFT engine (backed by `rustfft`)
//! - EEG band power, asymmetry and quality features
//! - Audio level, spectrum and THD features
//! - Ring buffer → window → processor pipelines with deadline tracking
//! - A hosted microsecond counter, drift correction cadence and synthetic
//!   signal sources
//!
//! # Modules
//!
//! - [`processing`]: FFT engine and feature processors
//! - [`pipeline`]: Consumer-side wiring and the feedback policy contract
//! - [`config`]: Serializable configuration with validation
//! - [`clock`]: `std::time::Instant` backed counter for [`TimeSync`]
//! - [`drift`]: Periodic drift correction with logging
//! - [`sim`]: Synthetic EEG and audio sources
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use neuroloop_core::time_sync::TimeSync;
//! use neuroloop_core::types::ChannelMask;
//! use neuroloop_native::clock::InstantCounter;
//! use neuroloop_native::config::PipelineConfig;
//! use neuroloop_native::pipeline::EegPipeline;
//! use neuroloop_native::sim::SyntheticEeg;
//!
//! let config = PipelineConfig::default();
//! let time = Arc::new(TimeSync::init(InstantCounter::new(), config.drift).unwrap());
//! let (mut producer, mut pipeline) =
//!     EegPipeline::with_buffer(&config, time, ChannelMask::first(8)).unwrap();
//!
//! producer.write_bulk(&SyntheticEeg::resting_state(250.0).take_samples(256));
//! let records = pipeline.poll().unwrap();
//! assert_eq!(records.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod clock;
pub mod config;
pub mod drift;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod sim;

pub use neuroloop_core::time_sync::TimeSync;

// Re-export key types
pub use clock::{init_time_base, InstantCounter};
pub use drift::{DriftCorrector, DriftOutcome};
pub use config::{AudioConfig, BufferConfig, EegConfig, PipelineConfig};
pub use error::{ConfigError, ProcessingError, ProcessingResult};
pub use pipeline::{AudioPipeline, EegPipeline, FeedbackPolicy, PipelineStats, WindowAccumulator};
pub use processing::{AudioFeatureRecord, AudioProcessor, EegProcessor, FeatureRecord, FftEngine};
