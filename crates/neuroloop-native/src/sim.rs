//! Synthetic signal sources
//!
//! Stand-ins for the ADS1299 and I2S drivers when no hardware is attached.
//! Each generator is an endless [`Iterator`] of timestamped records, built
//! from a sum of sinusoids per channel plus an optional slow wander term.

use std::f32::consts::PI;

use neuroloop_core::types::{
    AudioFrame, ChannelMask, EegChannel, EegSample, Fixed24_8, Timestamp, MAX_EEG_CHANNELS,
};

/// One sinusoidal component
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tone {
    /// Frequency in Hz
    pub frequency_hz: f32,
    /// Peak amplitude (µV for EEG, full scale fraction for audio)
    pub amplitude: f32,
    /// Phase offset in radians
    pub phase_rad: f32,
}

impl Tone {
    /// Tone with zero phase
    #[must_use]
    pub const fn new(frequency_hz: f32, amplitude: f32) -> Self {
        Self { frequency_hz, amplitude, phase_rad: 0.0 }
    }

    /// Same tone shifted by `phase_rad`
    #[must_use]
    pub const fn with_phase(mut self, phase_rad: f32) -> Self {
        self.phase_rad = phase_rad;
        self
    }

    /// Value at `t` seconds
    #[inline]
    #[must_use]
    pub fn at(&self, t: f32) -> f32 {
        self.amplitude * (2.0 * PI * self.frequency_hz * t + self.phase_rad).sin()
    }
}

/// Timestamp of sample `index` at `sample_rate_hz`, without accumulating error.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_time_us(origin_us: Timestamp, index: u64, sample_rate_hz: f32) -> Timestamp {
    origin_us + (index as f64 * 1_000_000.0 / f64::from(sample_rate_hz)) as u64
}

/// Time in seconds of sample `index`, reduced modulo one second of samples
/// so long runs keep `f32` phase precision for integer-Hz tones.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sample_time_s(index: u64, sample_rate_hz: f32) -> f32 {
    let per_second = sample_rate_hz.round().max(1.0) as u64;
    (index % per_second) as f32 / sample_rate_hz
}

// ============================================================================
// EEG
// ============================================================================

/// Multi-channel EEG generator
#[derive(Clone, Debug)]
pub struct SyntheticEeg {
    sample_rate_hz: f32,
    origin_us: Timestamp,
    tones: [Vec<Tone>; MAX_EEG_CHANNELS],
    wander_uv: f32,
    quality: [u8; MAX_EEG_CHANNELS],
    index: u64,
}

impl SyntheticEeg {
    /// Silent generator at `sample_rate_hz`
    #[must_use]
    pub fn new(sample_rate_hz: f32) -> Self {
        Self {
            sample_rate_hz,
            origin_us: 0,
            tones: Default::default(),
            wander_uv: 0.0,
            quality: [EegSample::QUALITY_GOOD; MAX_EEG_CHANNELS],
            index: 0,
        }
    }

    /// Resting-state montage: 10 Hz alpha and a weaker 20 Hz beta on every
    /// channel with a per-channel phase shift, plus a slow wander term.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn resting_state(sample_rate_hz: f32) -> Self {
        let mut eeg = Self::new(sample_rate_hz).with_wander(2.0);
        for ch in 0..MAX_EEG_CHANNELS {
            let phase = ch as f32 * 0.5;
            eeg.tones[ch].push(Tone::new(10.0, 10.0).with_phase(phase));
            eeg.tones[ch].push(Tone::new(20.0, 5.0).with_phase(2.0 * phase));
        }
        eeg
    }

    /// Add `tone` to every channel in `channels`
    #[must_use]
    pub fn with_tone(mut self, channels: ChannelMask, tone: Tone) -> Self {
        for ch in channels.iter() {
            self.tones[ch].push(tone);
        }
        self
    }

    /// Amplitude (µV) of a slow per-channel wander term
    #[must_use]
    pub fn with_wander(mut self, amplitude_uv: f32) -> Self {
        self.wander_uv = amplitude_uv;
        self
    }

    /// Fixed quality reported for `channel`
    #[must_use]
    pub fn with_quality(mut self, channel: EegChannel, quality: u8) -> Self {
        self.quality[channel.index()] = quality.min(EegSample::QUALITY_GOOD);
        self
    }

    /// Timestamp of the first sample
    #[must_use]
    pub fn starting_at(mut self, origin_us: Timestamp) -> Self {
        self.origin_us = origin_us;
        self
    }

    /// Skip `count` samples without producing them, leaving a sequence gap
    pub fn skip_samples(&mut self, count: u64) {
        self.index += count;
    }

    /// Sample rate in Hz
    #[must_use]
    pub fn sample_rate_hz(&self) -> f32 {
        self.sample_rate_hz
    }

    /// Produce the next sample
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn next_sample(&mut self) -> EegSample {
        let index = self.index;
        self.index += 1;

        let mut sample = EegSample::new(sample_time_us(self.origin_us, index, self.sample_rate_hz), index as u32);
        let t = sample_time_s(index, self.sample_rate_hz);
        for (ch, tones) in self.tones.iter().enumerate() {
            let mut value: f32 = tones.iter().map(|tone| tone.at(t)).sum();
            if self.wander_uv != 0.0 {
                value += self.wander_uv * ((index % 10_000) as f32 * 0.1 + ch as f32).sin();
            }
            sample.channels[ch] = Fixed24_8::from_f32(value);
        }
        sample.quality = self.quality;
        sample
    }

    /// Produce the next `count` samples
    pub fn take_samples(&mut self, count: usize) -> Vec<EegSample> {
        (0..count).map(|_| self.next_sample()).collect()
    }
}

impl Iterator for SyntheticEeg {
    type Item = EegSample;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_sample())
    }
}

// ============================================================================
// Audio
// ============================================================================

/// Stereo PCM generator
#[derive(Clone, Debug)]
pub struct SyntheticAudio {
    sample_rate_hz: f32,
    origin_us: Timestamp,
    left: Vec<Tone>,
    right: Vec<Tone>,
    index: u64,
}

impl SyntheticAudio {
    /// Silent generator at `sample_rate_hz`
    #[must_use]
    pub fn new(sample_rate_hz: f32) -> Self {
        Self { sample_rate_hz, origin_us: 0, left: Vec::new(), right: Vec::new(), index: 0 }
    }

    /// Add `tone` (amplitude as a fraction of full scale) to both channels
    #[must_use]
    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.left.push(tone);
        self.right.push(tone);
        self
    }

    /// Add `tone` to the left channel only
    #[must_use]
    pub fn with_left_tone(mut self, tone: Tone) -> Self {
        self.left.push(tone);
        self
    }

    /// Add `tone` to the right channel only
    #[must_use]
    pub fn with_right_tone(mut self, tone: Tone) -> Self {
        self.right.push(tone);
        self
    }

    /// Timestamp of the first frame
    #[must_use]
    pub fn starting_at(mut self, origin_us: Timestamp) -> Self {
        self.origin_us = origin_us;
        self
    }

    /// Produce the next frame; values beyond full scale clip.
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_frame(&mut self) -> AudioFrame {
        let index = self.index;
        self.index += 1;

        let t = sample_time_s(index, self.sample_rate_hz);
        let pcm = |tones: &[Tone]| {
            let value: f32 = tones.iter().map(|tone| tone.at(t)).sum();
            (value * 32767.0).clamp(-32768.0, 32767.0) as i16
        };
        AudioFrame::new(
            sample_time_us(self.origin_us, index, self.sample_rate_hz),
            index as u32,
            pcm(&self.left),
            pcm(&self.right),
        )
    }

    /// Produce the next `count` frames
    pub fn take_frames(&mut self, count: usize) -> Vec<AudioFrame> {
        (0..count).map(|_| self.next_frame()).collect()
    }
}

impl Iterator for SyntheticAudio {
    type Item = AudioFrame;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neuroloop_core::types::AudioChannel;

    #[test]
    fn test_eeg_timestamps_and_sequence() {
        let mut eeg = SyntheticEeg::new(250.0).starting_at(1_000);
        let samples = eeg.take_samples(3);

        assert_eq!(samples[0].timestamp_us, 1_000);
        assert_eq!(samples[1].timestamp_us, 5_000);
        assert_eq!(samples[2].sequence, 2);

        eeg.skip_samples(5);
        assert_eq!(eeg.next_sample().sequence, 8);
    }

    #[test]
    fn test_eeg_tone_on_selected_channels() {
        // Quarter period of 10 Hz at 400 Hz is sample 10
        let mut eeg = SyntheticEeg::new(400.0).with_tone(EegChannel::O1.into(), Tone::new(10.0, 50.0));
        let sample = eeg.nth(10).unwrap();

        assert!((sample.channel(EegChannel::O1).to_f32() - 50.0).abs() < 0.01);
        assert_eq!(sample.channel(EegChannel::O2), Fixed24_8::ZERO);
    }

    #[test]
    fn test_eeg_quality() {
        let sample = SyntheticEeg::resting_state(250.0).with_quality(EegChannel::F3, 20).next_sample();
        assert_eq!(sample.quality[EegChannel::F3.index()], 20);
        assert_eq!(sample.quality[EegChannel::F4.index()], EegSample::QUALITY_GOOD);
    }

    #[test]
    fn test_audio_channels_and_clipping() {
        let mut audio = SyntheticAudio::new(48_000.0)
            .with_left_tone(Tone::new(12_000.0, 0.5))
            .with_right_tone(Tone::new(12_000.0, 2.0));

        // Sample 1 is a quarter period of 12 kHz at 48 kHz
        let frame = audio.nth(1).unwrap();
        assert!((frame.to_f32(AudioChannel::Left) - 0.5).abs() < 1e-3);
        assert_eq!(frame.right, i16::MAX);
        assert_eq!(frame.timestamp_us, 20);
    }
}
