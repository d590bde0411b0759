//! Main-loop drift correction cadence
//!
//! [`DriftCorrector`] decides when the shared [`TimeSync`] should be compared
//! against a reference clock and logs what happened. Call
//! [`poll`](DriftCorrector::poll) from the main loop as often as convenient;
//! it corrects at most once per configured interval.

use neuroloop_core::error::TimeError;
use neuroloop_core::time_sync::{diff, FreeRunningCounter, ReferenceClock, TimeSync, SLEW_GUARD_US};
use neuroloop_core::types::Timestamp;

use crate::config::PipelineConfig;
use crate::error::{ConfigError, ProcessingResult};

/// What one [`DriftCorrector::poll`] did
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriftOutcome {
    /// The interval has not elapsed yet
    NotDue,
    /// A correction ran and scheduled this nudge (µs)
    Corrected {
        /// Nudge handed to the time base
        nudge_us: i64,
        /// Error measured before the nudge (µs)
        error_us: i64,
    },
    /// The reference could not be read; retried next interval
    ReferenceUnavailable,
}

/// Runs [`TimeSync::correct_drift`] at a fixed cadence
#[derive(Clone, Debug)]
pub struct DriftCorrector {
    interval_us: u64,
    next_due_us: Option<Timestamp>,
    consecutive_failures: u32,
}

impl DriftCorrector {
    /// Corrector running every `interval_us`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for a zero interval.
    pub fn new(interval_us: u64) -> ProcessingResult<Self> {
        if interval_us == 0 {
            return Err(ConfigError::OutOfRange { field: "drift_interval_us", reason: "must be non-zero" }.into());
        }
        Ok(Self { interval_us, next_due_us: None, consecutive_failures: 0 })
    }

    /// Corrector using `config.drift_interval_us`.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error found.
    pub fn from_config(config: &PipelineConfig) -> ProcessingResult<Self> {
        config.validate()?;
        Self::new(config.drift_interval_us)
    }

    /// Correct `time` against `reference` if the interval has elapsed.
    ///
    /// The first call always corrects. A reference dropout is logged and
    /// counted but never returned as an error; the time base keeps free
    /// running on its last offset.
    pub fn poll<C, R>(&mut self, time: &TimeSync<C>, reference: &mut R) -> DriftOutcome
    where
        C: FreeRunningCounter,
        R: ReferenceClock + ?Sized,
    {
        let now = time.raw_us();
        if let Some(due) = self.next_due_us {
            if diff(now, due) < 0 {
                return DriftOutcome::NotDue;
            }
        }
        self.next_due_us = Some(now.wrapping_add(self.interval_us));

        match time.correct_drift(reference) {
            Ok(nudge_us) => {
                if self.consecutive_failures > 0 {
                    tracing::info!(missed = self.consecutive_failures, "Drift reference recovered");
                    self.consecutive_failures = 0;
                }
                let stats = time.drift_stats();
                let tolerance = i64::from(time.config().tolerance_us);
                if stats.last_error_us.abs() > tolerance {
                    tracing::warn!(
                        error_us = stats.last_error_us,
                        tolerance_us = tolerance,
                        "Clock error exceeds tolerance"
                    );
                }
                tracing::debug!(
                    nudge_us,
                    error_us = stats.last_error_us,
                    drift_ppm = stats.drift_ppm,
                    "Drift corrected"
                );
                DriftOutcome::Corrected { nudge_us, error_us: stats.last_error_us }
            }
            Err(TimeError::ReferenceUnavailable) => {
                self.consecutive_failures += 1;
                tracing::warn!(consecutive = self.consecutive_failures, "Drift reference unavailable");
                DriftOutcome::ReferenceUnavailable
            }
            Err(e) => {
                self.consecutive_failures += 1;
                tracing::warn!("Drift correction failed: {}", e);
                DriftOutcome::ReferenceUnavailable
            }
        }
    }

    /// Correction interval (µs)
    #[must_use]
    pub fn interval_us(&self) -> u64 {
        self.interval_us
    }

    /// Reference failures since the last successful correction
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the interval is at least as long as a nudge takes to apply
    #[must_use]
    pub fn outlasts_slew<C: FreeRunningCounter>(&self, time: &TimeSync<C>) -> bool {
        self.interval_us > u64::from(time.config().slew_us) + SLEW_GUARD_US
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuroloop_core::time_sync::{DriftConfig, ManualCounter, SampleCountClock};

    fn time() -> TimeSync<ManualCounter> {
        TimeSync::init(ManualCounter::new(1_000_000), DriftConfig::default()).unwrap()
    }

    #[test]
    fn test_corrects_once_per_interval() {
        let time = time();
        let mut corrector = DriftCorrector::new(1_000_000).unwrap();
        assert!(corrector.outlasts_slew(&time));
        let mut reference = SampleCountClock::new(1_000_000, 0).unwrap();

        let mut corrected = 0;
        for _ in 0..50 {
            time.counter().advance(100_000);
            reference.record_samples(100_005);
            match corrector.poll(&time, &mut reference) {
                DriftOutcome::Corrected { .. } => corrected += 1,
                DriftOutcome::NotDue => {}
                DriftOutcome::ReferenceUnavailable => panic!("reference is running"),
            }
        }

        // 5 s of polling at 100 ms: first call plus one per second
        assert_eq!(corrected, 5);
        assert_eq!(time.drift_stats().corrections, 5);
    }

    #[test]
    fn test_dropout_counted_and_recovered() {
        let time = time();
        let mut corrector = DriftCorrector::new(1_000_000).unwrap();
        let mut reference = SampleCountClock::new(1_000_000, 0).unwrap();

        // Not running yet: unavailable
        assert_eq!(corrector.poll(&time, &mut reference), DriftOutcome::ReferenceUnavailable);
        time.counter().advance(1_000_000);
        assert_eq!(corrector.poll(&time, &mut reference), DriftOutcome::ReferenceUnavailable);
        assert_eq!(corrector.consecutive_failures(), 2);

        reference.record_samples(2_000_000);
        time.counter().advance(1_000_000);
        let outcome = corrector.poll(&time, &mut reference);
        assert_eq!(outcome, DriftOutcome::Corrected { nudge_us: 0, error_us: 0 });
        assert_eq!(corrector.consecutive_failures(), 0);
        assert_eq!(time.drift_stats().failures, 2);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(DriftCorrector::new(0).is_err());
        assert_eq!(DriftCorrector::from_config(&PipelineConfig::default()).unwrap().interval_us(), 1_000_000);
    }
}
