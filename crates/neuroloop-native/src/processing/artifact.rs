//! Amplitude and gradient artifact detection
//!
//! Eye blinks and muscle activity show up as large excursions or steep
//! sample-to-sample jumps. Flagged samples are counted, never removed: the
//! feature processor lowers the window's quality and marks the record, and
//! the feedback policy decides what to do with it.

use serde::{Deserialize, Serialize};

use neuroloop_core::types::{ChannelMask, EegSample, MAX_EEG_CHANNELS};

use crate::config::ArtifactThresholds;

/// Per-window artifact counts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactReport {
    /// Flagged samples per channel
    pub flagged_per_channel: [u32; MAX_EEG_CHANNELS],
    /// Samples where at least one selected channel was flagged
    pub flagged_samples: u32,
    /// Samples examined
    pub total_samples: u32,
}

impl ArtifactReport {
    /// Fraction of samples flagged, 0.0 to 1.0
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> f32 {
        if self.total_samples == 0 {
            return 0.0;
        }
        self.flagged_samples as f32 / self.total_samples as f32
    }

    /// Whether nothing was flagged
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.flagged_samples == 0
    }
}

/// Threshold-based artifact detector
#[derive(Clone, Copy, Debug, Default)]
pub struct ArtifactDetector {
    thresholds: ArtifactThresholds,
}

impl ArtifactDetector {
    /// Create a detector; unset thresholds are skipped
    #[must_use]
    pub fn new(thresholds: ArtifactThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in use
    #[must_use]
    pub fn thresholds(&self) -> &ArtifactThresholds {
        &self.thresholds
    }

    /// Scan `samples` on the channels in `channels`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn scan(&self, samples: &[EegSample], channels: ChannelMask) -> ArtifactReport {
        let mut report = ArtifactReport { total_samples: samples.len() as u32, ..ArtifactReport::default() };
        if !self.thresholds.is_enabled() {
            return report;
        }

        let mut previous: Option<&EegSample> = None;
        for sample in samples {
            let mut any = false;
            for ch in channels.iter() {
                let value = sample.channel_uv(ch);
                let amplitude_hit = self.thresholds.amplitude_uv.is_some_and(|limit| value.abs() > limit);
                let gradient_hit = match (self.thresholds.gradient_uv, previous) {
                    (Some(limit), Some(prev)) => (value - prev.channel_uv(ch)).abs() > limit,
                    _ => false,
                };
                if amplitude_hit || gradient_hit {
                    report.flagged_per_channel[ch] += 1;
                    any = true;
                }
            }
            if any {
                report.flagged_samples += 1;
            }
            previous = Some(sample);
        }

        report
    }
}
