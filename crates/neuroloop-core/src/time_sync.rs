//! Monotonic microsecond time base and cross-domain drift correction
//!
//! [`TimeSync`] extends a 32-bit free-running hardware counter to 64 bits with
//! an overflow-extension word maintained by the timer's overflow interrupt,
//! converts ticks to microseconds, and applies a slowly adjusted offset that
//! keeps the system clock aligned with a reference clock domain (the EEG ADC
//! sample clock or the audio codec word clock).
//!
//! Every piece of shared state lives in 32-bit atomics accessed with plain
//! loads and stores, so the service runs on cores without 64-bit or
//! read-modify-write atomics. `now_us()` never waits on a writer: a reader
//! that preempts `on_overflow` or `correct_drift` still gets a consistent
//! view, and only retries when a writer on another core moved underneath it.
//! Drift correction runs in the main loop at roughly 1 Hz.
//!
//! Corrections are slewed in rather than stepped, which keeps `now_us()`
//! monotonic without remembering the last value handed out.

use core::fmt;
use core::sync::atomic::{fence, AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TimeError;
use crate::types::Timestamp;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Weight of each new drift measurement in the rolling ppm estimate
const DRIFT_EMA_WEIGHT: f32 = 0.25;

/// Delay between computing a correction and the start of its slew (µs)
pub const SLEW_GUARD_US: u64 = 1_000;

/// Low bit of the extension word: `on_overflow` has advanced the high word
/// but not yet cleared the counter's pending flag
const EXTENSION_SERVICING: u32 = 1;

/// Counter values below this read as "just wrapped"
const HALF_RANGE: u32 = 0x8000_0000;

// ============================================================================
// Hardware Interfaces
// ============================================================================

/// Free-running hardware counter supplied by the timer HAL.
pub trait FreeRunningCounter {
    /// Configure and start the counter.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::HardwareError`] if the peripheral cannot be started.
    fn start(&mut self) -> Result<(), TimeError>;

    /// Current counter value.
    fn read(&self) -> u32;

    /// Counter tick frequency in Hz.
    fn frequency_hz(&self) -> u32;

    /// Whether the counter has wrapped but the overflow interrupt has not yet
    /// been serviced.
    fn overflow_pending(&self) -> bool {
        false
    }

    /// Acknowledge the overflow flag. Called from [`TimeSync::on_overflow`].
    fn clear_overflow(&self) {}

    /// Full-width tick count, for counters that never wrap in practice.
    ///
    /// Returning `Some` bypasses the overflow extension entirely; such a
    /// counter needs no overflow interrupt.
    fn read_extended(&self) -> Option<u64> {
        None
    }
}

/// A clock domain the system clock is corrected against.
pub trait ReferenceClock {
    /// Current reference time in microseconds on the system time scale.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::ReferenceUnavailable`] if the reference cannot be read.
    fn reference_us(&mut self) -> Result<Timestamp, TimeError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Drift correction tuning.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Largest offset change applied by one correction (µs)
    pub max_step_us: u32,
    /// Fraction of the measured error corrected per call, in (0, 1]
    pub gain: f32,
    /// Error below which the two domains count as synchronized (µs)
    pub tolerance_us: u32,
    /// Raw time over which each nudge is spread (µs); at least `max_step_us`
    #[serde(default = "default_slew_us")]
    pub slew_us: u32,
}

fn default_slew_us() -> u32 {
    500_000
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self { max_step_us: 100, gain: 0.5, tolerance_us: 1_000, slew_us: default_slew_us() }
    }
}

impl DriftConfig {
    /// Check the configuration for values the service cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidParam`] for a zero step, a gain outside
    /// (0, 1] or a slew shorter than one full step.
    pub fn validate(&self) -> Result<(), TimeError> {
        if self.max_step_us == 0 {
            return Err(TimeError::InvalidParam { reason: "max_step_us must be non-zero" });
        }
        if !(self.gain > 0.0 && self.gain <= 1.0) {
            return Err(TimeError::InvalidParam { reason: "gain must be in (0, 1]" });
        }
        // A nudge slewed faster than real time would run the clock backwards
        if self.slew_us < self.max_step_us {
            return Err(TimeError::InvalidParam { reason: "slew_us must be at least max_step_us" });
        }
        Ok(())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for DriftConfig {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f, "Drift(step={}us, gain={}, tol={}us, slew={}us)",
            self.max_step_us, self.gain, self.tolerance_us, self.slew_us
        );
    }
}

/// Snapshot of drift correction state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriftStats {
    /// Successful corrections
    pub corrections: u32,
    /// Corrections skipped because the reference was unavailable
    pub failures: u32,
    /// Offset currently applied to the raw counter time (µs)
    pub offset_us: i64,
    /// Rolling estimate of reference-vs-system rate difference (ppm)
    pub drift_ppm: f32,
    /// Error measured by the latest correction (µs)
    pub last_error_us: i64,
}

// ============================================================================
// Time Arithmetic
// ============================================================================

/// Signed difference `a - b` in microseconds, correct across wrap.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub const fn diff(a: Timestamp, b: Timestamp) -> i64 {
    a.wrapping_sub(b) as i64
}

/// Whether `a` and `b` lie within `tolerance_us` of each other.
#[inline]
#[must_use]
pub const fn are_synchronized(a: Timestamp, b: Timestamp, tolerance_us: u64) -> bool {
    diff(a, b).unsigned_abs() <= tolerance_us
}

/// Convert counter ticks to microseconds without 128-bit arithmetic.
#[inline]
const fn ticks_to_us(ticks: u64, frequency_hz: u32) -> u64 {
    let f = frequency_hz as u64;
    (ticks / f) * MICROS_PER_SECOND + (ticks % f) * MICROS_PER_SECOND / f
}

// ============================================================================
// Drift State
// ============================================================================

/// Offset schedule and estimator anchors, published by `correct_drift`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct DriftState {
    /// Raw time at which `nudge_us` starts slewing in
    slew_start_us: u64,
    /// Offset in force up to `slew_start_us`
    base_offset_us: i64,
    /// Adjustment spread linearly over the slew period
    nudge_us: i64,
    anchor_reference_us: u64,
    anchor_raw_us: u64,
    anchored: bool,
    last_error_us: i64,
}

const DRIFT_WORDS: usize = 13;

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn split(value: u64) -> [u32; 2] {
    [value as u32, (value >> 32) as u32]
}

#[inline]
const fn join(low: u32, high: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

impl DriftState {
    #[allow(clippy::cast_sign_loss)]
    fn to_words(self) -> [u32; DRIFT_WORDS] {
        let [a, b] = split(self.slew_start_us);
        let [c, d] = split(self.base_offset_us as u64);
        let [e, f] = split(self.nudge_us as u64);
        let [g, h] = split(self.anchor_reference_us);
        let [i, j] = split(self.anchor_raw_us);
        let [k, l] = split(self.last_error_us as u64);
        [a, b, c, d, e, f, g, h, i, j, k, l, u32::from(self.anchored)]
    }

    #[allow(clippy::cast_possible_wrap)]
    fn from_words(w: [u32; DRIFT_WORDS]) -> Self {
        Self {
            slew_start_us: join(w[0], w[1]),
            base_offset_us: join(w[2], w[3]) as i64,
            nudge_us: join(w[4], w[5]) as i64,
            anchor_reference_us: join(w[6], w[7]),
            anchor_raw_us: join(w[8], w[9]),
            last_error_us: join(w[10], w[11]) as i64,
            anchored: w[12] != 0,
        }
    }

    /// Offset in force at raw time `raw_us`.
    ///
    /// Moves by at most `|nudge| / slew` per microsecond, so with
    /// `|nudge| <= slew` the corrected time never decreases.
    fn offset_at(&self, raw_us: Timestamp, slew_us: u32) -> i64 {
        let into = diff(raw_us, self.slew_start_us);
        if into <= 0 || self.nudge_us == 0 {
            return self.base_offset_us;
        }
        let slew = i64::from(slew_us.max(1));
        self.base_offset_us + self.nudge_us * into.min(slew) / slew
    }

    /// Whether the current nudge has been fully applied by `raw_us`
    fn settled_at(&self, raw_us: Timestamp, slew_us: u32) -> bool {
        self.nudge_us == 0 || diff(raw_us, self.slew_start_us) >= i64::from(slew_us)
    }
}

/// Double-buffered [`DriftState`] with a version word.
///
/// The single writer fills the slot readers are not looking at, then flips
/// the version. A reader interrupting the writer never sees a torn value; a
/// reader racing it from another core retries.
struct DriftCell {
    version: AtomicU32,
    slots: [[AtomicU32; DRIFT_WORDS]; 2],
}

impl DriftCell {
    fn new(state: DriftState) -> Self {
        let words = state.to_words();
        Self {
            version: AtomicU32::new(0),
            slots: core::array::from_fn(|_| core::array::from_fn(|i| AtomicU32::new(words[i]))),
        }
    }

    fn load(&self) -> DriftState {
        loop {
            let version = self.version.load(Ordering::Acquire);
            let slot = &self.slots[(version & 1) as usize];
            let words: [u32; DRIFT_WORDS] = core::array::from_fn(|i| slot[i].load(Ordering::Relaxed));
            fence(Ordering::Acquire);
            if self.version.load(Ordering::Relaxed) == version {
                return DriftState::from_words(words);
            }
            core::hint::spin_loop();
        }
    }

    /// Publish `state`. Only one caller may store at a time.
    fn store(&self, state: DriftState) {
        let version = self.version.load(Ordering::Relaxed);
        let next = version.wrapping_add(1);
        // Slot writes must not be observed before the previous flip
        fence(Ordering::Release);
        for (word, value) in self.slots[(next & 1) as usize].iter().zip(state.to_words()) {
            word.store(value, Ordering::Relaxed);
        }
        self.version.store(next, Ordering::Release);
    }
}

// ============================================================================
// Time Sync Service
// ============================================================================

/// System time base shared by every pipeline component.
pub struct TimeSync<C> {
    counter: C,
    frequency_hz: u32,
    config: DriftConfig,
    /// High word of the tick count shifted left by one, low bit
    /// `EXTENSION_SERVICING`; written only by `on_overflow`
    extension: AtomicU32,
    /// Written only by `correct_drift`
    drift: DriftCell,
    drift_ppm_bits: AtomicU32,
    corrections: AtomicU32,
    failures: AtomicU32,
}

impl<C> fmt::Debug for TimeSync<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let drift = self.drift.load();
        f.debug_struct("TimeSync")
            .field("frequency_hz", &self.frequency_hz)
            .field("base_offset_us", &drift.base_offset_us)
            .field("nudge_us", &drift.nudge_us)
            .field("overflows", &(self.extension.load(Ordering::Relaxed) >> 1))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<C: FreeRunningCounter> TimeSync<C> {
    /// Start `counter` and build the time base on top of it.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::HardwareError`] if the counter fails to start or
    /// reports a zero frequency, and [`TimeError::InvalidParam`] for an
    /// unusable drift configuration.
    pub fn init(mut counter: C, config: DriftConfig) -> Result<Self, TimeError> {
        config.validate()?;
        counter.start()?;

        let frequency_hz = counter.frequency_hz();
        if frequency_hz == 0 {
            return Err(TimeError::HardwareError { reason: "counter reports zero frequency" });
        }

        Ok(Self {
            counter,
            frequency_hz,
            config,
            extension: AtomicU32::new(0),
            drift: DriftCell::new(DriftState::default()),
            drift_ppm_bits: AtomicU32::new(0f32.to_bits()),
            corrections: AtomicU32::new(0),
            failures: AtomicU32::new(0),
        })
    }

    /// Overflow interrupt handler hook.
    ///
    /// Only the counter's overflow interrupt may call this. The high word is
    /// advanced and flagged before the counter's pending flag is cleared, so
    /// a reader never counts the same wrap twice.
    pub fn on_overflow(&self) {
        let high = (self.extension.load(Ordering::Relaxed) >> 1).wrapping_add(1);
        self.extension.store((high << 1) | EXTENSION_SERVICING, Ordering::Release);
        self.counter.clear_overflow();
        self.extension.store(high << 1, Ordering::Release);
    }

    /// Number of counter wraps delivered through [`on_overflow`](Self::on_overflow).
    #[inline]
    #[must_use]
    pub fn overflows(&self) -> u32 {
        self.extension.load(Ordering::Acquire) >> 1
    }

    /// 64-bit tick count.
    ///
    /// Re-reads the extension word until it is unchanged around the counter
    /// reads, so a wrap landing in between is never lost or doubled.
    fn ticks(&self) -> u64 {
        if let Some(ticks) = self.counter.read_extended() {
            return ticks;
        }
        loop {
            let word = self.extension.load(Ordering::Acquire);
            let low = self.counter.read();
            let pending = self.counter.overflow_pending();
            fence(Ordering::Acquire);
            if self.extension.load(Ordering::Relaxed) == word {
                let mut high = word >> 1;
                // A wrapped counter whose interrupt has not run yet reads
                // small; count the wrap here. Mid-service the high word
                // already includes it.
                if (word & EXTENSION_SERVICING) == 0 && pending && low < HALF_RANGE {
                    high = high.wrapping_add(1);
                }
                return join(low, high);
            }
            core::hint::spin_loop();
        }
    }

    /// Counter time without drift offset (µs).
    #[inline]
    #[must_use]
    pub fn raw_us(&self) -> Timestamp {
        ticks_to_us(self.ticks(), self.frequency_hz)
    }

    /// Corrected, monotonic system time (µs).
    ///
    /// Negative nudges are spread over `slew_us` of raw time, so the result
    /// never decreases even while one is being absorbed.
    #[must_use]
    pub fn now_us(&self) -> Timestamp {
        let raw = self.raw_us();
        let state = self.drift.load();
        raw.wrapping_add_signed(state.offset_at(raw, self.config.slew_us))
    }

    /// Compare the system clock against `reference` and schedule a nudge.
    ///
    /// Returns the nudge in microseconds, bounded by `max_step_us`. It starts
    /// slewing in [`SLEW_GUARD_US`] after the call and is fully applied
    /// `slew_us` later. A call made while the previous nudge is still
    /// slewing measures the error but schedules nothing and returns 0. A
    /// failed reference read is counted and returned; the time base is left
    /// untouched.
    ///
    /// Call from one context only (the main loop).
    ///
    /// # Errors
    ///
    /// Propagates the reference clock's error (normally
    /// [`TimeError::ReferenceUnavailable`]). Never fatal.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn correct_drift<R: ReferenceClock + ?Sized>(&self, reference: &mut R) -> Result<i64, TimeError> {
        let reference_us = match reference.reference_us() {
            Ok(t) => t,
            Err(e) => {
                let n = self.failures.load(Ordering::Relaxed);
                self.failures.store(n.wrapping_add(1), Ordering::Relaxed);
                return Err(e);
            }
        };

        let slew_us = self.config.slew_us;
        let raw = self.raw_us();
        let mut state = self.drift.load();
        let system = raw.wrapping_add_signed(state.offset_at(raw, slew_us));
        let error = diff(reference_us, system);

        let nudge = if state.settled_at(raw, slew_us) {
            let max_step = i64::from(self.config.max_step_us);
            let nudge = ((error as f32 * self.config.gain) as i64).clamp(-max_step, max_step);
            state.base_offset_us += state.nudge_us;
            state.nudge_us = nudge;
            state.slew_start_us = raw.wrapping_add(SLEW_GUARD_US);
            nudge
        } else {
            0
        };

        if state.anchored {
            let d_reference = diff(reference_us, state.anchor_reference_us);
            let d_raw = diff(raw, state.anchor_raw_us);
            if d_raw > 0 {
                let measured = (d_reference - d_raw) as f32 / d_raw as f32 * 1e6;
                let previous = f32::from_bits(self.drift_ppm_bits.load(Ordering::Relaxed));
                let estimate = if self.corrections.load(Ordering::Relaxed) <= 1 {
                    measured
                } else {
                    previous + DRIFT_EMA_WEIGHT * (measured - previous)
                };
                self.drift_ppm_bits.store(estimate.to_bits(), Ordering::Relaxed);
            }
        }
        state.anchor_reference_us = reference_us;
        state.anchor_raw_us = raw;
        state.anchored = true;
        state.last_error_us = error;
        self.drift.store(state);

        let n = self.corrections.load(Ordering::Relaxed);
        self.corrections.store(n.wrapping_add(1), Ordering::Relaxed);
        Ok(nudge)
    }

    /// Whether `reference_us` is within the configured tolerance of now.
    #[must_use]
    pub fn is_synchronized_with(&self, reference_us: Timestamp) -> bool {
        are_synchronized(self.now_us(), reference_us, u64::from(self.config.tolerance_us))
    }

    /// Begin an interval measurement.
    #[inline]
    #[must_use]
    pub fn start_measure(&self) -> Marker {
        Marker { start_us: self.now_us() }
    }

    /// Finish an interval measurement and fold it into `stats`.
    ///
    /// Returns the measured duration in microseconds.
    #[allow(clippy::cast_sign_loss)]
    pub fn end_measure(&self, marker: Marker, stats: &mut PerformanceMarker) -> u64 {
        let elapsed = diff(self.now_us(), marker.start_us).max(0) as u64;
        stats.record(elapsed);
        elapsed
    }

    /// Poll `condition` until it holds or `timeout_us` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::Timeout`] if the condition never became true.
    pub fn poll_until<F: FnMut() -> bool>(&self, timeout_us: u64, mut condition: F) -> Result<(), TimeError> {
        let start = self.now_us();
        loop {
            if condition() {
                return Ok(());
            }
            if diff(self.now_us(), start).unsigned_abs() >= timeout_us {
                return Err(TimeError::Timeout { timeout_us });
            }
            core::hint::spin_loop();
        }
    }

    /// Current drift correction state.
    #[must_use]
    pub fn drift_stats(&self) -> DriftStats {
        let state = self.drift.load();
        DriftStats {
            corrections: self.corrections.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            offset_us: state.offset_at(self.raw_us(), self.config.slew_us),
            drift_ppm: self.drift_ppm(),
            last_error_us: state.last_error_us,
        }
    }

    /// Rolling drift estimate in ppm (positive: reference runs fast).
    #[inline]
    #[must_use]
    pub fn drift_ppm(&self) -> f32 {
        f32::from_bits(self.drift_ppm_bits.load(Ordering::Relaxed))
    }

    /// Drift offset in force right now (µs).
    #[must_use]
    pub fn offset_us(&self) -> i64 {
        self.drift.load().offset_at(self.raw_us(), self.config.slew_us)
    }

    /// Counter tick frequency captured at init.
    #[inline]
    #[must_use]
    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    /// Drift configuration in use.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// The underlying counter.
    #[inline]
    #[must_use]
    pub fn counter(&self) -> &C {
        &self.counter
    }
}

// ============================================================================
// Performance Markers
// ============================================================================

/// Start point of an interval measurement.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Marker {
    start_us: Timestamp,
}

impl Marker {
    /// Time the measurement started.
    #[inline]
    #[must_use]
    pub const fn start_us(&self) -> Timestamp {
        self.start_us
    }
}

/// Rolling interval statistics for one measured code path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMarker {
    count: u32,
    total_us: u64,
    min_us: u64,
    max_us: u64,
    last_us: u64,
}

impl PerformanceMarker {
    /// Empty statistics.
    #[must_use]
    pub const fn new() -> Self {
        Self { count: 0, total_us: 0, min_us: 0, max_us: 0, last_us: 0 }
    }

    /// Fold one duration into the statistics.
    pub fn record(&mut self, duration_us: u64) {
        if self.count == 0 {
            self.min_us = duration_us;
            self.max_us = duration_us;
        } else {
            self.min_us = self.min_us.min(duration_us);
            self.max_us = self.max_us.max(duration_us);
        }
        self.count = self.count.saturating_add(1);
        self.total_us = self.total_us.saturating_add(duration_us);
        self.last_us = duration_us;
    }

    /// Number of recorded intervals.
    #[inline]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Shortest interval, if any were recorded.
    #[inline]
    pub const fn min_us(&self) -> Option<u64> {
        if self.count == 0 { None } else { Some(self.min_us) }
    }

    /// Longest interval, if any were recorded.
    #[inline]
    pub const fn max_us(&self) -> Option<u64> {
        if self.count == 0 { None } else { Some(self.max_us) }
    }

    /// Most recent interval.
    #[inline]
    pub const fn last_us(&self) -> u64 {
        self.last_us
    }

    /// Sum of all recorded intervals.
    #[inline]
    pub const fn total_us(&self) -> u64 {
        self.total_us
    }

    /// Mean interval, if any were recorded.
    #[inline]
    pub fn mean_us(&self) -> Option<u64> {
        if self.count == 0 { None } else { Some(self.total_us / u64::from(self.count)) }
    }

    /// Clear all statistics.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

// ============================================================================
// Simulation Counters and Reference Clocks
// ============================================================================

/// Software counter driven explicitly by the caller.
///
/// Used for simulation and tests. Every `read` can optionally advance the
/// counter by a fixed step so bounded polling loops make progress.
#[derive(Debug)]
pub struct ManualCounter {
    value: AtomicU32,
    step: u32,
    frequency_hz: u32,
    pending: AtomicBool,
    fail_start: bool,
}

impl ManualCounter {
    /// Counter at zero ticking at `frequency_hz`.
    #[must_use]
    pub const fn new(frequency_hz: u32) -> Self {
        Self {
            value: AtomicU32::new(0),
            step: 0,
            frequency_hz,
            pending: AtomicBool::new(false),
            fail_start: false,
        }
    }

    /// Advance by `step` ticks on every read.
    #[must_use]
    pub const fn with_auto_advance(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    /// A counter whose `start` fails, modelling a dead timer peripheral.
    #[must_use]
    pub const fn failing(frequency_hz: u32) -> Self {
        let mut counter = Self::new(frequency_hz);
        counter.fail_start = true;
        counter
    }

    /// Set the counter value.
    pub fn set(&self, ticks: u32) {
        self.value.store(ticks, Ordering::Release);
    }

    /// Advance by `ticks`; returns `true` and raises the overflow flag if the
    /// counter wrapped.
    ///
    /// The flag is raised before the wrapped value is visible, as a timer
    /// peripheral does.
    pub fn advance(&self, ticks: u32) -> bool {
        let before = self.value.load(Ordering::Acquire);
        let (after, wrapped) = before.overflowing_add(ticks);
        if wrapped {
            self.pending.store(true, Ordering::Release);
        }
        self.value.store(after, Ordering::Release);
        wrapped
    }
}

impl FreeRunningCounter for ManualCounter {
    fn start(&mut self) -> Result<(), TimeError> {
        if self.fail_start {
            return Err(TimeError::HardwareError { reason: "timer peripheral did not start" });
        }
        Ok(())
    }

    fn read(&self) -> u32 {
        if self.step == 0 {
            self.value.load(Ordering::Acquire)
        } else {
            self.advance(self.step);
            self.value.load(Ordering::Acquire)
        }
    }

    fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    fn overflow_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    fn clear_overflow(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

/// Reference clock derived from a device sample counter.
///
/// The device produces samples at a nominal rate on its own oscillator;
/// `count × 1e6 / rate` measured from `origin_us` is that domain's notion of
/// elapsed time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleCountClock {
    nominal_rate_hz: u32,
    origin_us: Timestamp,
    samples: u64,
    running: bool,
}

impl SampleCountClock {
    /// Reference for a device sampling at `nominal_rate_hz`, started at `origin_us`.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidParam`] for a zero rate.
    pub fn new(nominal_rate_hz: u32, origin_us: Timestamp) -> Result<Self, TimeError> {
        if nominal_rate_hz == 0 {
            return Err(TimeError::InvalidParam { reason: "nominal rate must be non-zero" });
        }
        Ok(Self { nominal_rate_hz, origin_us, samples: 0, running: false })
    }

    /// Account for `count` newly delivered samples.
    pub fn record_samples(&mut self, count: u64) {
        self.samples = self.samples.saturating_add(count);
        self.running = true;
    }

    /// Samples delivered so far.
    #[must_use]
    pub const fn samples(&self) -> u64 {
        self.samples
    }
}

impl ReferenceClock for SampleCountClock {
    fn reference_us(&mut self) -> Result<Timestamp, TimeError> {
        if !self.running {
            return Err(TimeError::ReferenceUnavailable);
        }
        Ok(self.origin_us.wrapping_add(ticks_to_us(self.samples, self.nominal_rate_hz)))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn service(counter: ManualCounter) -> TimeSync<ManualCounter> {
        TimeSync::init(counter, DriftConfig::default()).unwrap()
    }

    #[test]
    fn test_init_failure_is_fatal() {
        let err = TimeSync::init(ManualCounter::failing(1_000_000), DriftConfig::default())
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_init_rejects_bad_config() {
        let config = DriftConfig { gain: 0.0, ..DriftConfig::default() };
        assert!(matches!(
            TimeSync::init(ManualCounter::new(1_000_000), config),
            Err(TimeError::InvalidParam { .. })
        ));
        assert!(matches!(
            TimeSync::init(ManualCounter::new(0), DriftConfig::default()),
            Err(TimeError::HardwareError { .. })
        ));
    }

    #[test]
    fn test_tick_conversion() {
        assert_eq!(ticks_to_us(84_000_000, 84_000_000), 1_000_000);
        assert_eq!(ticks_to_us(42, 84_000_000), 0);
        assert_eq!(ticks_to_us(3, 1_000_000), 3);
        assert_eq!(ticks_to_us(u64::from(u32::MAX) * 4, 1_000_000), 17_179_869_180);
    }

    #[test]
    fn test_monotonic_with_auto_advance() {
        let time = service(ManualCounter::new(1_000_000).with_auto_advance(7));
        let mut previous = time.now_us();
        for _ in 0..1000 {
            let now = time.now_us();
            assert!(diff(now, previous) >= 0);
            previous = now;
        }
    }

    #[test]
    fn test_overflow_extension() {
        let time = service(ManualCounter::new(1_000_000));
        time.counter().set(u32::MAX - 10);
        let before = time.now_us();

        // Wrapped but interrupt not yet serviced
        assert!(time.counter().advance(20));
        let pending = time.now_us();
        assert_eq!(pending - before, 20);

        // Interrupt serviced; result must not jump
        time.on_overflow();
        assert!(!time.counter().overflow_pending());
        assert_eq!(time.now_us(), pending);
        assert_eq!(time.overflows(), 1);
    }

    #[test]
    fn test_wrap_counted_once_while_interrupt_is_mid_service() {
        let time = service(ManualCounter::new(1_000_000));
        time.counter().set(u32::MAX - 10);
        assert!(time.counter().advance(20));
        let expected = (1u64 << 32) + 9;
        assert_eq!(time.raw_us(), expected);

        // High word advanced, pending flag not yet cleared
        time.extension.store((1 << 1) | EXTENSION_SERVICING, Ordering::Release);
        assert!(time.counter().overflow_pending());
        assert_eq!(time.raw_us(), expected);

        time.counter().clear_overflow();
        time.extension.store(1 << 1, Ordering::Release);
        assert_eq!(time.raw_us(), expected);
    }

    #[test]
    fn test_drift_state_words() {
        let state = DriftState {
            slew_start_us: (7 << 32) + 11,
            base_offset_us: -3_000_000_000,
            nudge_us: -100,
            anchor_reference_us: u64::MAX - 5,
            anchor_raw_us: 42,
            anchored: true,
            last_error_us: i64::MIN + 1,
        };
        assert_eq!(DriftState::from_words(state.to_words()), state);

        let cell = DriftCell::new(DriftState::default());
        cell.store(state);
        assert_eq!(cell.load(), state);
        cell.store(DriftState { nudge_us: 5, ..state });
        assert_eq!(cell.load().nudge_us, 5);
    }

    #[test]
    fn test_diff_across_wrap() {
        assert_eq!(diff(5, u64::MAX - 4), 10);
        assert_eq!(diff(u64::MAX - 4, 5), -10);
        assert!(are_synchronized(1_000, 1_400, 500));
        assert!(!are_synchronized(1_000, 1_600, 500));
    }

    #[test]
    fn test_nudge_is_bounded() {
        let time = service(ManualCounter::new(1_000_000));
        time.counter().set(1_000_000);

        let mut reference = SampleCountClock::new(1_000, 0).unwrap();
        reference.record_samples(1_010); // 10 ms ahead

        let nudge = time.correct_drift(&mut reference).unwrap();
        assert_eq!(nudge, 100);
        assert_eq!(time.drift_stats().last_error_us, 10_000);

        // Nothing applied until the guard passes, all of it after the slew
        assert_eq!(time.offset_us(), 0);
        time.counter().advance(1_000 + 250_000);
        assert_eq!(time.offset_us(), 50);
        time.counter().advance(250_000);
        assert_eq!(time.offset_us(), 100);
    }

    #[test]
    fn test_correction_during_slew_schedules_nothing() {
        let time = service(ManualCounter::new(1_000_000));
        time.counter().set(1_000_000);

        let mut reference = SampleCountClock::new(1_000, 0).unwrap();
        reference.record_samples(1_010);
        assert_eq!(time.correct_drift(&mut reference).unwrap(), 100);

        time.counter().advance(100_000);
        reference.record_samples(100);
        assert_eq!(time.correct_drift(&mut reference).unwrap(), 0);
        assert_eq!(time.drift_stats().corrections, 2);

        time.counter().advance(500_000);
        assert_eq!(time.offset_us(), 100);
    }

    #[test]
    fn test_negative_nudge_keeps_monotonic() {
        let time = service(ManualCounter::new(1_000_000));
        time.counter().set(2_000_000);
        let before = time.now_us();

        let mut reference = SampleCountClock::new(1_000, 0).unwrap();
        reference.record_samples(1_000); // 1 s behind

        assert_eq!(time.correct_drift(&mut reference).unwrap(), -100);
        assert!(time.now_us() >= before);

        // Step across the whole slew one microsecond at a time
        let mut previous = time.now_us();
        for _ in 0..(SLEW_GUARD_US + 500_000) {
            time.counter().advance(1);
            let now = time.now_us();
            assert!(now >= previous, "{now} < {previous}");
            previous = now;
        }
        assert_eq!(time.offset_us(), -100);
        assert_eq!(time.now_us(), 2_000_000 + SLEW_GUARD_US + 500_000 - 100);
    }

    #[test]
    fn test_slew_shorter_than_step_rejected() {
        let config = DriftConfig { max_step_us: 1_000, slew_us: 999, ..DriftConfig::default() };
        assert!(matches!(config.validate(), Err(TimeError::InvalidParam { .. })));
        assert!(DriftConfig { slew_us: 1_000, ..config }.validate().is_ok());
    }

    #[test]
    fn test_reference_failure_counted() {
        let time = service(ManualCounter::new(1_000_000));
        let mut reference = SampleCountClock::new(250, 0).unwrap();

        assert_eq!(time.correct_drift(&mut reference), Err(TimeError::ReferenceUnavailable));
        let stats = time.drift_stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.corrections, 0);
        assert_eq!(stats.offset_us, 0);
    }

    #[test]
    fn test_performance_marker() {
        let time = service(ManualCounter::new(1_000_000));
        let mut stats = PerformanceMarker::new();
        assert_eq!(stats.mean_us(), None);

        for duration in [30u32, 10, 20] {
            let marker = time.start_measure();
            time.counter().advance(duration);
            assert_eq!(time.end_measure(marker, &mut stats), u64::from(duration));
        }

        assert_eq!(stats.count(), 3);
        assert_eq!(stats.min_us(), Some(10));
        assert_eq!(stats.max_us(), Some(30));
        assert_eq!(stats.mean_us(), Some(20));
        assert_eq!(stats.last_us(), 20);

        stats.reset();
        assert_eq!(stats.count(), 0);
    }

    #[test]
    fn test_poll_until() {
        let time = service(ManualCounter::new(1_000_000).with_auto_advance(10));

        let mut calls = 0;
        assert!(time.poll_until(1_000, || {
            calls += 1;
            calls == 5
        }).is_ok());

        assert_eq!(
            time.poll_until(500, || false),
            Err(TimeError::Timeout { timeout_us: 500 })
        );
    }
}
