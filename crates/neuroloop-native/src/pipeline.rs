//! Consumer-side pipeline wiring
//!
//! A pipeline owns the consumer half of a ring buffer, a shared time base and
//! a feature processor. Each [`poll`](EegPipeline::poll) drains everything the
//! producer has written, slides it through a [`WindowAccumulator`] and runs
//! the processor once per complete window:
//!
//! ```text
//! driver ──▶ Producer ══ ring ══ Consumer ──▶ WindowAccumulator ──▶ processor ──▶ FeedbackPolicy
//! ```
//!
//! Processing time is measured against a deadline. A late window is logged
//! and counted, never cut short. A sequence gap discards the partial window
//! so no window ever spans missing samples. Records are taken from the ring
//! one drain chunk at a time; a poll that fails leaves the rest of its chunk
//! queued for the next poll.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use neuroloop_core::ring_buffer::{BufferStats, Consumer, Producer, RingBuffer};
use neuroloop_core::time_sync::{FreeRunningCounter, PerformanceMarker, TimeSync};
use neuroloop_core::types::{AudioFrame, ChannelMask, EegSample};

use crate::config::PipelineConfig;
use crate::error::{ProcessingError, ProcessingResult};
use crate::processing::{AudioFeatureRecord, AudioProcessor, EegProcessor, FeatureRecord};

/// Records pulled from the ring per bulk read
const DRAIN_CHUNK: usize = 64;

// ============================================================================
// Feedback Policy
// ============================================================================

/// The neurofeedback engine's side of the loop.
///
/// Receives every EEG feature record, including low-quality ones (check
/// [`FeatureRecord::is_usable`]), and may answer with a command for the
/// audio path. The pipeline never inspects the command.
pub trait FeedbackPolicy {
    /// Modulation command understood by the audio path
    type Command;

    /// React to one feature record
    fn on_features(&mut self, record: &FeatureRecord) -> Option<Self::Command>;
}

// ============================================================================
// Window Accumulator
// ============================================================================

/// Sliding window over a record stream.
///
/// Collects `size` records; after a window is consumed, [`advance`](Self::advance)
/// drops the oldest `hop` so consecutive windows overlap by `size - hop`.
#[derive(Clone, Debug)]
pub struct WindowAccumulator<T> {
    window: Vec<T>,
    size: usize,
    hop: usize,
}

impl<T: Copy> WindowAccumulator<T> {
    /// Create an accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError::InvalidParam`] unless `0 < hop <= size`.
    pub fn new(size: usize, hop: usize) -> ProcessingResult<Self> {
        if size == 0 {
            return Err(ProcessingError::InvalidParam { reason: "window size must be non-zero" });
        }
        if hop == 0 || hop > size {
            return Err(ProcessingError::InvalidParam { reason: "hop must be in 1..=window size" });
        }
        Ok(Self { window: Vec::with_capacity(size), size, hop })
    }

    /// Append one record; returns `true` when a full window is ready.
    ///
    /// A ready window that was not advanced is advanced first.
    pub fn push(&mut self, value: T) -> bool {
        if self.is_ready() {
            self.advance();
        }
        self.window.push(value);
        self.is_ready()
    }

    /// Whether a full window is available
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.window.len() == self.size
    }

    /// Records currently held, oldest first
    #[must_use]
    pub fn window(&self) -> &[T] {
        &self.window
    }

    /// Drop the oldest `hop` records
    pub fn advance(&mut self) {
        let n = self.hop.min(self.window.len());
        self.window.drain(..n);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Records currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether nothing is held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Window length
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Records dropped per advance
    #[must_use]
    pub fn hop(&self) -> usize {
        self.hop
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of a pipeline's counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Windows turned into records
    pub windows_processed: u64,
    /// Discontinuities seen in the sequence numbers
    pub sequence_gaps: u64,
    /// Windows whose processing exceeded the deadline
    pub deadline_misses: u64,
    /// Ring buffer counters
    pub buffer: BufferStats,
    /// Per-window processing time
    pub timing: PerformanceMarker,
}

/// Records carrying a driver sequence number
trait Sequenced: Copy + Default {
    fn sequence(&self) -> u32;
}

impl Sequenced for EegSample {
    fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl Sequenced for AudioFrame {
    fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// Consumer-side bookkeeping shared by both pipelines
#[derive(Debug)]
struct Intake<T: Copy + Send> {
    name: &'static str,
    consumer: Consumer<T>,
    accumulator: WindowAccumulator<T>,
    /// Records drained from the ring; `scratch[head..filled]` not yet accepted
    scratch: Vec<T>,
    head: usize,
    filled: usize,
    expected_sequence: Option<u32>,
    seen_overruns: u32,
    deadline_us: u64,
    timing: PerformanceMarker,
    windows_processed: u64,
    sequence_gaps: u64,
    deadline_misses: u64,
}

impl<T: Sequenced + Send> Intake<T> {
    fn new(name: &'static str, consumer: Consumer<T>, size: usize, hop: usize, deadline_us: u64) -> ProcessingResult<Self> {
        if deadline_us == 0 {
            return Err(ProcessingError::InvalidParam { reason: "deadline must be non-zero" });
        }
        Ok(Self {
            name,
            consumer,
            accumulator: WindowAccumulator::new(size, hop)?,
            scratch: vec![T::default(); DRAIN_CHUNK],
            head: 0,
            filled: 0,
            expected_sequence: None,
            seen_overruns: 0,
            deadline_us,
            timing: PerformanceMarker::new(),
            windows_processed: 0,
            sequence_gaps: 0,
            deadline_misses: 0,
        })
    }

    /// Report producer overruns since the last poll
    fn check_overruns(&mut self) {
        let overruns = self.consumer.stats().overruns;
        if overruns != self.seen_overruns {
            tracing::warn!(
                pipeline = self.name,
                dropped_writes = overruns.wrapping_sub(self.seen_overruns),
                "Ring buffer overrun"
            );
            self.seen_overruns = overruns;
        }
    }

    /// Next record, draining another chunk from the ring when the last is used up
    fn next_record(&mut self) -> Option<T> {
        if self.head == self.filled {
            self.filled = self.consumer.read_bulk(&mut self.scratch);
            self.head = 0;
        }
        let value = self.scratch[..self.filled].get(self.head).copied()?;
        self.head += 1;
        Some(value)
    }

    /// Feed one record; returns `true` when a full window is ready.
    fn accept(&mut self, value: T) -> bool {
        let sequence = value.sequence();
        if let Some(expected) = self.expected_sequence {
            if sequence != expected {
                tracing::warn!("Sequence gap: expected {}, got {}", expected, sequence);
                self.sequence_gaps += 1;
                self.accumulator.clear();
            }
        }
        self.expected_sequence = Some(sequence.wrapping_add(1));
        self.accumulator.push(value)
    }

    /// Close out one processed window
    fn finish_window(&mut self, elapsed_us: u64) {
        self.windows_processed += 1;
        if elapsed_us > self.deadline_us {
            self.deadline_misses += 1;
            tracing::warn!(
                pipeline = self.name,
                elapsed_us,
                deadline_us = self.deadline_us,
                "Window processing overran deadline"
            );
        }
        self.accumulator.advance();
    }

    /// Give up on the ready window after a processor error
    fn reject_window(&mut self, error: &ProcessingError) {
        tracing::warn!(pipeline = self.name, "Window dropped: {}", error);
        self.accumulator.advance();
    }

    fn stats(&self) -> PipelineStats {
        PipelineStats {
            windows_processed: self.windows_processed,
            sequence_gaps: self.sequence_gaps,
            deadline_misses: self.deadline_misses,
            buffer: self.consumer.stats(),
            timing: self.timing.clone(),
        }
    }
}

// ============================================================================
// EEG Pipeline
// ============================================================================

/// EEG consumer: ring buffer → windows → [`FeatureRecord`]s
#[derive(Debug)]
pub struct EegPipeline<C> {
    intake: Intake<EegSample>,
    processor: EegProcessor,
    channels: ChannelMask,
    time: Arc<TimeSync<C>>,
}

impl<C: FreeRunningCounter> EegPipeline<C> {
    /// Wire a pipeline onto an existing consumer handle.
    ///
    /// `channels` selects the channels averaged into the band powers.
    ///
    /// # Errors
    ///
    /// Returns an error if the EEG configuration or deadline is invalid,
    /// [`ProcessingError::InvalidParam`] for an empty channel selection and
    /// [`ProcessingError::ChannelOutOfRange`] for a channel the configuration
    /// does not have.
    pub fn new(
        consumer: Consumer<EegSample>,
        time: Arc<TimeSync<C>>,
        config: &PipelineConfig,
        channels: ChannelMask,
    ) -> ProcessingResult<Self> {
        let processor = EegProcessor::from_config(config.eeg.clone())?;
        processor.check_channels(channels)?;
        let intake = Intake::new(
            "eeg",
            consumer,
            config.eeg.window_size,
            config.eeg.hop_size(),
            config.deadline_us,
        )?;
        Ok(Self { intake, processor, channels, time })
    }

    /// Allocate the EEG ring buffer and wire a pipeline onto its consumer.
    ///
    /// Returns the producer handle for the acquisition side.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_buffer(
        config: &PipelineConfig,
        time: Arc<TimeSync<C>>,
        channels: ChannelMask,
    ) -> ProcessingResult<(Producer<EegSample>, Self)> {
        config.validate()?;
        let (producer, consumer) = RingBuffer::new(config.buffers.eeg_capacity)?.split();
        Ok((producer, Self::new(consumer, time, config, channels)?))
    }

    /// Drain the ring buffer and process every complete window.
    ///
    /// # Errors
    ///
    /// Propagates processor errors. The failing window is dropped and records
    /// produced earlier in the same call are lost; samples not yet reached
    /// stay queued for the next poll.
    pub fn poll(&mut self) -> ProcessingResult<Vec<FeatureRecord>> {
        self.intake.check_overruns();

        let mut records = Vec::new();
        while let Some(sample) = self.intake.next_record() {
            if !self.intake.accept(sample) {
                continue;
            }
            let marker = self.time.start_measure();
            let record = match self.processor.process_window(self.intake.accumulator.window(), self.channels) {
                Ok(record) => record,
                Err(e) => {
                    self.intake.reject_window(&e);
                    return Err(e);
                }
            };
            let elapsed_us = self.time.end_measure(marker, &mut self.intake.timing);
            self.intake.finish_window(elapsed_us);

            tracing::debug!(
                timestamp_us = record.timestamp_us,
                quality = record.quality,
                elapsed_us,
                "EEG window processed"
            );
            records.push(record);
        }
        Ok(records)
    }

    /// Poll and hand every record to `policy`, collecting its commands.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`poll`](Self::poll).
    pub fn poll_with<P: FeedbackPolicy>(&mut self, policy: &mut P) -> ProcessingResult<Vec<P::Command>> {
        Ok(self.poll()?.iter().filter_map(|record| policy.on_features(record)).collect())
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.intake.stats()
    }

    /// The feature processor
    #[must_use]
    pub fn processor(&self) -> &EegProcessor {
        &self.processor
    }

    /// Mutable access to the feature processor, e.g. to reset smoothing
    pub fn processor_mut(&mut self) -> &mut EegProcessor {
        &mut self.processor
    }

    /// Channels averaged into the band powers
    #[must_use]
    pub fn channels(&self) -> ChannelMask {
        self.channels
    }

    /// Shared time base
    #[must_use]
    pub fn time(&self) -> &Arc<TimeSync<C>> {
        &self.time
    }
}

// ============================================================================
// Audio Pipeline
// ============================================================================

/// Audio consumer: ring buffer → blocks → [`AudioFeatureRecord`]s
#[derive(Debug)]
pub struct AudioPipeline<C> {
    intake: Intake<AudioFrame>,
    processor: AudioProcessor,
    time: Arc<TimeSync<C>>,
}

impl<C: FreeRunningCounter> AudioPipeline<C> {
    /// Wire a pipeline onto an existing consumer handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio configuration or deadline is invalid.
    pub fn new(consumer: Consumer<AudioFrame>, time: Arc<TimeSync<C>>, config: &PipelineConfig) -> ProcessingResult<Self> {
        let processor = AudioProcessor::new(config.audio.clone())?;
        let block = config.audio.block_size;
        let intake = Intake::new("audio", consumer, block, config.audio.overlap.hop_size(block), config.deadline_us)?;
        Ok(Self { intake, processor, time })
    }

    /// Allocate the audio ring buffer and wire a pipeline onto its consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_buffer(
        config: &PipelineConfig,
        time: Arc<TimeSync<C>>,
    ) -> ProcessingResult<(Producer<AudioFrame>, Self)> {
        config.validate()?;
        let (producer, consumer) = RingBuffer::new(config.buffers.audio_capacity)?.split();
        Ok((producer, Self::new(consumer, time, config)?))
    }

    /// Drain the ring buffer and process every complete block.
    ///
    /// # Errors
    ///
    /// Propagates processor errors with the same recovery as
    /// [`EegPipeline::poll`].
    pub fn poll(&mut self) -> ProcessingResult<Vec<AudioFeatureRecord>> {
        self.intake.check_overruns();

        let mut records = Vec::new();
        while let Some(frame) = self.intake.next_record() {
            if !self.intake.accept(frame) {
                continue;
            }
            let marker = self.time.start_measure();
            let record = match self.processor.process_block(self.intake.accumulator.window()) {
                Ok(record) => record,
                Err(e) => {
                    self.intake.reject_window(&e);
                    return Err(e);
                }
            };
            let elapsed_us = self.time.end_measure(marker, &mut self.intake.timing);
            self.intake.finish_window(elapsed_us);

            tracing::debug!(timestamp_us = record.timestamp_us, rms = record.rms, elapsed_us, "audio block processed");
            records.push(record);
        }
        Ok(records)
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.intake.stats()
    }

    /// The feature processor
    #[must_use]
    pub fn processor(&self) -> &AudioProcessor {
        &self.processor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EegConfig;
    use crate::sim::{SyntheticEeg, Tone};
    use neuroloop_core::time_sync::{DriftConfig, ManualCounter};

    fn time(step: u32) -> Arc<TimeSync<ManualCounter>> {
        let counter = ManualCounter::new(1_000_000).with_auto_advance(step);
        Arc::new(TimeSync::init(counter, DriftConfig::default()).unwrap())
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            eeg: EegConfig { sample_rate_hz: 256.0, window_size: 256, ..EegConfig::default() },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_accumulator_overlap() {
        let mut acc = WindowAccumulator::new(4, 2).unwrap();
        assert!(!acc.push(1));
        assert!(!acc.push(2));
        assert!(!acc.push(3));
        assert!(acc.push(4));
        assert_eq!(acc.window(), &[1, 2, 3, 4]);

        acc.advance();
        assert!(!acc.push(5));
        assert!(acc.push(6));
        assert_eq!(acc.window(), &[3, 4, 5, 6]);

        // Unadvanced window is advanced on the next push
        assert!(!acc.push(7));
        assert_eq!(acc.window(), &[5, 6, 7]);
    }

    #[test]
    fn test_accumulator_rejects_bad_hop() {
        assert!(WindowAccumulator::<u8>::new(4, 0).is_err());
        assert!(WindowAccumulator::<u8>::new(4, 5).is_err());
        assert!(WindowAccumulator::<u8>::new(0, 0).is_err());
    }

    #[test]
    fn test_eeg_windows_with_overlap() {
        let (mut producer, mut pipeline) = EegPipeline::with_buffer(&config(), time(1), ChannelMask::first(8)).unwrap();
        let mut eeg = SyntheticEeg::new(256.0).with_tone(ChannelMask::first(8), Tone::new(10.0, 20.0));

        // 256-sample window, 128-sample hop: 512 samples give 3 windows
        assert_eq!(producer.write_bulk(&eeg.take_samples(512)), 512);
        let records = pipeline.poll().unwrap();
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].timestamp_us < w[1].timestamp_us));

        let stats = pipeline.stats();
        assert_eq!(stats.windows_processed, 3);
        assert_eq!(stats.sequence_gaps, 0);
        assert_eq!(stats.deadline_misses, 0);
        assert_eq!(stats.timing.count(), 3);

        assert!(pipeline.poll().unwrap().is_empty());
    }

    #[test]
    fn test_sequence_gap_discards_partial_window() {
        let (mut producer, mut pipeline) = EegPipeline::with_buffer(&config(), time(1), ChannelMask::first(8)).unwrap();
        let mut eeg = SyntheticEeg::new(256.0);

        producer.write_bulk(&eeg.take_samples(200));
        eeg.skip_samples(10);
        producer.write_bulk(&eeg.take_samples(255));
        assert!(pipeline.poll().unwrap().is_empty());
        assert_eq!(pipeline.stats().sequence_gaps, 1);

        producer.write_bulk(&eeg.take_samples(1));
        assert_eq!(pipeline.poll().unwrap().len(), 1);
    }

    #[test]
    fn test_bad_channel_selection_rejected_at_construction() {
        let (_, consumer) = RingBuffer::<EegSample>::new(256).unwrap().split();
        let err = EegPipeline::new(consumer, time(1), &config(), ChannelMask::NONE).unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidParam { .. }));

        let mut cfg = config();
        cfg.eeg.channel_count = 4;
        let err = EegPipeline::with_buffer(&cfg, time(1), ChannelMask::first(8)).err().unwrap();
        assert_eq!(err, ProcessingError::ChannelOutOfRange { channel: 4, count: 4 });
        let (_, pipeline) = EegPipeline::with_buffer(&cfg, time(1), ChannelMask::first(4)).unwrap();
        let debug = format!("{pipeline:?}");
        assert!(debug.starts_with("EegPipeline"));
        assert!(debug.contains("Intake"));
    }

    #[test]
    fn test_intake_keeps_undrained_records() {
        let (mut producer, consumer) = RingBuffer::<EegSample>::new(256).unwrap().split();
        let mut intake = Intake::new("eeg", consumer, 4, 4, 1_000).unwrap();
        producer.write_bulk(&SyntheticEeg::new(256.0).take_samples(100));

        // Stop at the first full window, as a failing poll does
        let mut taken = Vec::new();
        while let Some(sample) = intake.next_record() {
            taken.push(sample.sequence);
            if intake.accept(sample) {
                break;
            }
        }
        assert_eq!(taken, [0, 1, 2, 3]);
        intake.reject_window(&ProcessingError::InvalidParam { reason: "test" });
        assert!(intake.accumulator.is_empty());

        let rest: Vec<u32> = std::iter::from_fn(|| intake.next_record()).map(|s| s.sequence).collect();
        assert_eq!(rest, (4..100).collect::<Vec<_>>());
        assert_eq!(intake.sequence_gaps, 0);
    }

    #[test]
    fn test_deadline_miss_is_counted_not_fatal() {
        // Every counter read advances 50 ms, past the 20 ms deadline
        let (mut producer, mut pipeline) = EegPipeline::with_buffer(&config(), time(50_000), ChannelMask::first(8)).unwrap();
        producer.write_bulk(&SyntheticEeg::new(256.0).take_samples(256));

        let records = pipeline.poll().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(pipeline.stats().deadline_misses, 1);
    }

    #[test]
    fn test_feedback_policy() {
        struct AlphaGate;

        impl FeedbackPolicy for AlphaGate {
            type Command = f32;

            fn on_features(&mut self, record: &FeatureRecord) -> Option<f32> {
                record.is_usable().then(|| record.band_power(2).unwrap_or(0.0))
            }
        }

        let (mut producer, mut pipeline) = EegPipeline::with_buffer(&config(), time(1), ChannelMask::first(8)).unwrap();
        let mut eeg = SyntheticEeg::new(256.0).with_tone(ChannelMask::first(8), Tone::new(10.0, 20.0));
        producer.write_bulk(&eeg.take_samples(256));

        let commands = pipeline.poll_with(&mut AlphaGate).unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0] > 0.0);
    }

    #[test]
    fn test_overruns_reach_stats() {
        let mut cfg = config();
        cfg.buffers.eeg_capacity = 64;
        let (mut producer, pipeline) = EegPipeline::with_buffer(&cfg, time(1), ChannelMask::first(8)).unwrap();

        let written = producer.write_bulk(&SyntheticEeg::new(256.0).take_samples(100));
        assert_eq!(written, 63);
        assert_eq!(pipeline.stats().buffer.overruns, 1);
    }

    #[test]
    fn test_audio_blocks() {
        use crate::sim::SyntheticAudio;

        let (mut producer, mut pipeline) = AudioPipeline::with_buffer(&PipelineConfig::default(), time(1)).unwrap();
        let mut audio = SyntheticAudio::new(48_000.0).with_tone(Tone::new(1_000.0, 0.25));

        for _ in 0..2 {
            producer.write_bulk(&audio.take_frames(2048));
            assert_eq!(pipeline.poll().unwrap().len(), 1);
        }
        assert_eq!(pipeline.stats().windows_processed, 2);
    }
}
