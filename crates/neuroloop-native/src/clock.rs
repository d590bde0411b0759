//! Hosted time source
//!
//! [`InstantCounter`] presents `std::time::Instant` as a 1 MHz free-running
//! counter so the core [`TimeSync`] service runs unchanged on a desktop host.
//! It reports its full 64-bit tick count, so a host has no overflow interrupt
//! to service.

use std::time::Instant;

use neuroloop_core::error::TimeError;
use neuroloop_core::time_sync::{DriftConfig, FreeRunningCounter, TimeSync};

/// Tick rate of [`InstantCounter`]
pub const INSTANT_COUNTER_HZ: u32 = 1_000_000;

/// Microsecond counter backed by the host's monotonic clock
#[derive(Clone, Copy, Debug, Default)]
pub struct InstantCounter {
    origin: Option<Instant>,
}

impl InstantCounter {
    /// Counter that starts at zero when [`FreeRunningCounter::start`] is called
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn elapsed_us(&self) -> u64 {
        self.origin
            .map_or(0, |origin| u64::try_from(origin.elapsed().as_micros()).unwrap_or(u64::MAX))
    }
}

impl FreeRunningCounter for InstantCounter {
    fn start(&mut self) -> Result<(), TimeError> {
        if self.origin.is_none() {
            self.origin = Some(Instant::now());
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read(&self) -> u32 {
        self.elapsed_us() as u32
    }

    fn frequency_hz(&self) -> u32 {
        INSTANT_COUNTER_HZ
    }

    fn read_extended(&self) -> Option<u64> {
        Some(self.elapsed_us())
    }
}

/// Start the system time base on `counter`.
///
/// A counter that will not start leaves the system without timestamps; that
/// failure is logged at error level before it is returned.
///
/// # Errors
///
/// Propagates [`TimeSync::init`] errors.
pub fn init_time_base<C: FreeRunningCounter>(counter: C, config: DriftConfig) -> Result<TimeSync<C>, TimeError> {
    match TimeSync::init(counter, config) {
        Ok(time) => {
            tracing::info!(frequency_hz = time.frequency_hz(), slew_us = config.slew_us, "Time base started");
            Ok(time)
        }
        Err(e) if e.is_fatal() => {
            tracing::error!("Time base failed to start: {}", e);
            Err(e)
        }
        Err(e) => {
            tracing::warn!("Time base rejected its configuration: {}", e);
            Err(e)
        }
    }
}
