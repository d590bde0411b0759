//! Neuroloop Core - `no_std` real-time streaming primitives
//!
//! This crate provides the parts of the neurofeedback pipeline that run on the
//! acquisition side: sample types, DMA frame parsing, the lock-free SPSC ring
//! buffer that carries samples from interrupt context to the main loop, and
//! the monotonic time base with drift correction. It works in `no_std`
//! environments with an allocator, as well as on hosted targets.
//!
//! # Modules
//!
//! - [`types`]: Sample records, fixed-point values, channels and bands
//! - [`error`]: Error types for buffers, timing and frame parsing
//! - [`ring_buffer`]: Lock-free single-producer/single-consumer queue
//! - [`time_sync`]: Monotonic microsecond clock, drift correction, markers
//! - [`protocol`]: ADS1299 and I2S frame parsing
//! - [`math`]: Window functions, smoothing and block statistics
//!
//! # Features
//!
//! - `std`: Implement `std::error::Error` for the error types
//! - `defmt`: Enable `defmt` formatting for embedded logging
//!
//! # Example
//!
//! ```rust
//! use neuroloop_core::ring_buffer::RingBuffer;
//! use neuroloop_core::types::{EegChannel, EegSample, Fixed24_8};
//!
//! let (mut producer, mut consumer) = RingBuffer::<EegSample>::new(512).unwrap().split();
//!
//! let mut sample = EegSample::new(1000, 1);
//! sample.set_channel(EegChannel::C3, Fixed24_8::from_f32(15.5));
//! producer.write(sample).unwrap();
//!
//! let mut out = EegSample::default();
//! consumer.read(&mut out).unwrap();
//! assert!((out.channel(EegChannel::C3).to_f32() - 15.5).abs() < 0.1);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod math;
pub mod protocol;
pub mod ring_buffer;
pub mod time_sync;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{BufferError, FrameError, TimeError};
pub use math::WindowType;
pub use ring_buffer::{BufferStats, Consumer, Producer, RingBuffer};
pub use time_sync::{
    DriftConfig, FreeRunningCounter, ManualCounter, Marker, PerformanceMarker, ReferenceClock,
    SampleCountClock, TimeSync,
};
pub use types::{
    AudioChannel, AudioFrame, ChannelMask, EegBand, EegChannel, EegSample, Fixed24_8,
    FrequencyBand, Timestamp,
};
