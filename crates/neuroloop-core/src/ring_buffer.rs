//! Lock-free single-producer/single-consumer ring buffer
//!
//! Moves fixed-size `Copy` records from one producer context (typically a
//! DMA-complete interrupt) to one consumer context (the main processing loop)
//! without locks, allocation or blocking on either path.
//!
//! # Layout
//!
//! The backing store holds `capacity` slots, where `capacity` is a power of
//! two so slot addressing is `index & (capacity - 1)`. Cursors are unbounded
//! wrapping `usize` counters; `write_index - read_index` is the number of
//! stored records. One slot is always left free, so `read == write` means
//! empty and `write - read == capacity - 1` means full. No separate element
//! counter exists.
//!
//! Statistics (`overruns`, `underruns`, `peak_usage`) are advisory and each
//! has a single writer: overruns and peak usage are written on the producer
//! path, underruns on the consumer path. They use plain atomic load/store so
//! the producer path works on cores without atomic read-modify-write.
//!
//! # Example
//!
//! ```
//! use neuroloop_core::ring_buffer::RingBuffer;
//!
//! let rb = RingBuffer::<u32>::new(8).unwrap();
//! let (mut tx, mut rx) = rb.split();
//!
//! tx.write(7).unwrap();
//! let mut out = 0;
//! rx.read(&mut out).unwrap();
//! assert_eq!(out, 7);
//! ```

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::{Cell, UnsafeCell};
use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, MaybeUninit};
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::BufferError;

/// Keeps each cursor on its own cache line so producer and consumer
/// do not invalidate each other's line on every store.
#[repr(align(64))]
struct CachePadded<T>(T);

/// Snapshot of ring buffer statistics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    /// Writes rejected because the buffer was full
    pub overruns: u32,
    /// Reads rejected because the buffer was empty
    pub underruns: u32,
    /// Highest number of stored records observed after a write
    pub peak_usage: usize,
}

#[cfg(feature = "defmt")]
impl defmt::Format for BufferStats {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f, "RB(over={}, under={}, peak={})",
            self.overruns, self.underruns, self.peak_usage
        );
    }
}

// ============================================================================
// Shared State
// ============================================================================

struct Shared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    write_index: CachePadded<AtomicUsize>,
    read_index: CachePadded<AtomicUsize>,
    overruns: AtomicU32,
    underruns: AtomicU32,
    peak_usage: AtomicUsize,
}

// SAFETY: slot access is partitioned by the cursors. The producer only
// touches slots in `[write, read + capacity - 1)`, the consumer only slots in
// `[read, write)`, and each cursor has exactly one writer (enforced by the
// `&mut self` receivers and the `!Sync` handles below).
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T: Copy> Shared<T> {
    fn new(capacity: usize) -> Result<Self, BufferError> {
        if mem::size_of::<T>() == 0 {
            return Err(BufferError::InvalidParam { reason: "element size must be non-zero" });
        }
        if capacity == 0 {
            return Err(BufferError::InvalidParam { reason: "capacity must be non-zero" });
        }
        if !capacity.is_power_of_two() {
            return Err(BufferError::InvalidParam { reason: "capacity must be a power of two" });
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| BufferError::InvalidParam { reason: "backing storage unavailable" })?;
        slots.extend((0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            write_index: CachePadded(AtomicUsize::new(0)),
            read_index: CachePadded(AtomicUsize::new(0)),
            overruns: AtomicU32::new(0),
            underruns: AtomicU32::new(0),
            peak_usage: AtomicUsize::new(0),
        })
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline]
    fn available(&self) -> usize {
        let read = self.read_index.0.load(Ordering::Acquire);
        let write = self.write_index.0.load(Ordering::Acquire);
        // The two loads are not atomic together; clamp to the usable size.
        write.wrapping_sub(read).min(self.mask)
    }

    #[inline]
    fn free_space(&self) -> usize {
        self.mask - self.available()
    }

    fn usage_percent(&self) -> u8 {
        if self.mask == 0 {
            return 100;
        }
        (self.available() * 100 / self.mask) as u8
    }

    fn stats(&self) -> BufferStats {
        BufferStats {
            overruns: self.overruns.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            peak_usage: self.peak_usage.load(Ordering::Relaxed),
        }
    }

    fn reset_stats(&self) {
        self.overruns.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.peak_usage.store(0, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------------
    // Producer path
    // ------------------------------------------------------------------------

    #[inline]
    fn count_overrun(&self) {
        let n = self.overruns.load(Ordering::Relaxed);
        self.overruns.store(n.wrapping_add(1), Ordering::Relaxed);
    }

    #[inline]
    fn record_usage(&self, used: usize) {
        if used > self.peak_usage.load(Ordering::Relaxed) {
            self.peak_usage.store(used, Ordering::Relaxed);
        }
    }

    /// # Safety
    ///
    /// Caller must be the only producer.
    #[inline]
    unsafe fn write(&self, value: T) -> Result<(), BufferError> {
        let write = self.write_index.0.load(Ordering::Relaxed);
        let read = self.read_index.0.load(Ordering::Acquire);
        let used = write.wrapping_sub(read);

        if used >= self.mask {
            self.count_overrun();
            return Err(BufferError::BufferFull);
        }

        // SAFETY: slot `write` is outside `[read, write)`, so the consumer
        // does not read it until the Release store below publishes it.
        unsafe { self.slot(write).write(MaybeUninit::new(value)) };
        self.write_index.0.store(write.wrapping_add(1), Ordering::Release);
        self.record_usage(used + 1);
        Ok(())
    }

    /// # Safety
    ///
    /// Caller must be the only producer.
    unsafe fn write_bulk(&self, values: &[T]) -> usize {
        let write = self.write_index.0.load(Ordering::Relaxed);
        let read = self.read_index.0.load(Ordering::Acquire);
        let used = write.wrapping_sub(read);
        let count = values.len().min(self.mask - used);

        for (offset, value) in values[..count].iter().enumerate() {
            // SAFETY: see `write`; every slot in the run is free.
            unsafe { self.slot(write.wrapping_add(offset)).write(MaybeUninit::new(*value)) };
        }
        if count > 0 {
            self.write_index.0.store(write.wrapping_add(count), Ordering::Release);
            self.record_usage(used + count);
        }
        if count < values.len() {
            self.count_overrun();
        }
        count
    }

    // ------------------------------------------------------------------------
    // Consumer path
    // ------------------------------------------------------------------------

    #[inline]
    fn count_underrun(&self) {
        let n = self.underruns.load(Ordering::Relaxed);
        self.underruns.store(n.wrapping_add(1), Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// Caller must be the only consumer.
    #[inline]
    unsafe fn peek(&self, out: &mut T) -> Result<(), BufferError> {
        let read = self.read_index.0.load(Ordering::Relaxed);
        let write = self.write_index.0.load(Ordering::Acquire);

        if read == write {
            self.count_underrun();
            return Err(BufferError::BufferEmpty);
        }

        // SAFETY: slot `read` lies in `[read, write)`, initialized and
        // published by the producer's Release store.
        *out = unsafe { self.slot(read).read().assume_init() };
        Ok(())
    }

    /// # Safety
    ///
    /// Caller must be the only consumer.
    #[inline]
    unsafe fn read(&self, out: &mut T) -> Result<(), BufferError> {
        // SAFETY: forwarded contract.
        unsafe { self.peek(out)? };
        let read = self.read_index.0.load(Ordering::Relaxed);
        self.read_index.0.store(read.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// # Safety
    ///
    /// Caller must be the only consumer.
    unsafe fn read_bulk(&self, out: &mut [T]) -> usize {
        let read = self.read_index.0.load(Ordering::Relaxed);
        let write = self.write_index.0.load(Ordering::Acquire);
        let count = out.len().min(write.wrapping_sub(read));

        for (offset, dst) in out[..count].iter_mut().enumerate() {
            // SAFETY: see `peek`; every slot in the run is published.
            *dst = unsafe { self.slot(read.wrapping_add(offset)).read().assume_init() };
        }
        if count > 0 {
            self.read_index.0.store(read.wrapping_add(count), Ordering::Release);
        } else if !out.is_empty() {
            self.count_underrun();
        }
        count
    }

    /// Caller must be the only consumer.
    fn clear(&self) {
        let write = self.write_index.0.load(Ordering::Acquire);
        self.read_index.0.store(write, Ordering::Release);
    }

    #[inline]
    fn slot(&self, index: usize) -> *mut MaybeUninit<T> {
        self.slots[index & self.mask].get()
    }
}

// ============================================================================
// Owning Buffer
// ============================================================================

/// SPSC ring buffer owning its backing store.
///
/// Used directly when one context both fills and drains the buffer (tests,
/// single-threaded hosts), or split into a [`Producer`]/[`Consumer`] pair
/// that can be handed to the interrupt and main-loop contexts.
pub struct RingBuffer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy + Send> RingBuffer<T> {
    /// Create a buffer with `capacity` slots (`capacity - 1` usable).
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::InvalidParam`] if `capacity` is zero or not a
    /// power of two, if `T` is zero-sized, or if the backing store cannot be
    /// allocated.
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        Ok(Self { shared: Arc::new(Shared::new(capacity)?) })
    }

    /// Split into producer and consumer handles sharing this backing store.
    ///
    /// The store is released when both handles have been dropped.
    #[must_use]
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        (
            Producer { shared: Arc::clone(&self.shared), _not_sync: PhantomData },
            Consumer { shared: self.shared, _not_sync: PhantomData },
        )
    }

    /// Copy `value` into the next free slot.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::BufferFull`] (and counts an overrun) when no
    /// slot is free; the buffer is left unchanged.
    #[inline]
    pub fn write(&mut self, value: T) -> Result<(), BufferError> {
        // SAFETY: `&mut self` excludes any other producer or consumer.
        unsafe { self.shared.write(value) }
    }

    /// Move the oldest record into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::BufferEmpty`] (and counts an underrun) when
    /// nothing is stored; `out` is left untouched.
    #[inline]
    pub fn read(&mut self, out: &mut T) -> Result<(), BufferError> {
        // SAFETY: `&mut self` excludes any other producer or consumer.
        unsafe { self.shared.read(out) }
    }

    /// Copy the oldest record into `out` without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::BufferEmpty`] when nothing is stored.
    #[inline]
    pub fn peek(&mut self, out: &mut T) -> Result<(), BufferError> {
        // SAFETY: `&mut self` excludes any other producer or consumer.
        unsafe { self.shared.peek(out) }
    }

    /// Write as many of `values` as fit; returns the number written.
    pub fn write_bulk(&mut self, values: &[T]) -> usize {
        // SAFETY: `&mut self` excludes any other producer or consumer.
        unsafe { self.shared.write_bulk(values) }
    }

    /// Read up to `out.len()` records; returns the number read.
    pub fn read_bulk(&mut self, out: &mut [T]) -> usize {
        // SAFETY: `&mut self` excludes any other producer or consumer.
        unsafe { self.shared.read_bulk(out) }
    }

    /// Discard everything stored by moving the read cursor to the write cursor.
    pub fn clear(&mut self) {
        self.shared.clear();
    }

    /// Reset all statistics to zero.
    ///
    /// Only the unsplit buffer can do this. Each counter has a single writer
    /// (overruns the producer, underruns and peak the consumer), and a reset
    /// from the other side would race it; split handles cannot reset.
    ///
    /// ```compile_fail
    /// use neuroloop_core::ring_buffer::RingBuffer;
    ///
    /// let (producer, _consumer) = RingBuffer::<u8>::new(8).unwrap().split();
    /// producer.reset_stats();
    /// ```
    pub fn reset_stats(&mut self) {
        self.shared.reset_stats();
    }
}

// ============================================================================
// Split Handles
// ============================================================================

/// Producer half of a split [`RingBuffer`].
///
/// `Send` but not `Sync`: it can move into an interrupt handler or thread,
/// but cannot be shared, so there is exactly one writer.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Copy + Send> Producer<T> {
    /// Copy `value` into the next free slot.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::BufferFull`] when the consumer has fallen
    /// behind; the overrun is counted and the record is not stored.
    #[inline]
    pub fn write(&mut self, value: T) -> Result<(), BufferError> {
        // SAFETY: this handle is the unique producer.
        unsafe { self.shared.write(value) }
    }

    /// Write as many of `values` as fit; returns the number written.
    pub fn write_bulk(&mut self, values: &[T]) -> usize {
        // SAFETY: this handle is the unique producer.
        unsafe { self.shared.write_bulk(values) }
    }
}

/// Consumer half of a split [`RingBuffer`].
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<T: Copy + Send> Consumer<T> {
    /// Move the oldest record into `out`.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::BufferEmpty`] when nothing is stored.
    #[inline]
    pub fn read(&mut self, out: &mut T) -> Result<(), BufferError> {
        // SAFETY: this handle is the unique consumer.
        unsafe { self.shared.read(out) }
    }

    /// Copy the oldest record into `out` without consuming it.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::BufferEmpty`] when nothing is stored.
    #[inline]
    pub fn peek(&mut self, out: &mut T) -> Result<(), BufferError> {
        // SAFETY: this handle is the unique consumer.
        unsafe { self.shared.peek(out) }
    }

    /// Read up to `out.len()` records; returns the number read.
    pub fn read_bulk(&mut self, out: &mut [T]) -> usize {
        // SAFETY: this handle is the unique consumer.
        unsafe { self.shared.read_bulk(out) }
    }

    /// Discard everything currently stored.
    pub fn clear(&mut self) {
        self.shared.clear();
    }
}

macro_rules! impl_queries {
    ($($ty:ident),*) => {$(
        impl<T: Copy + Send> $ty<T> {
            /// Total slots in the backing store
            #[inline]
            #[must_use]
            pub fn capacity(&self) -> usize {
                self.shared.capacity()
            }

            /// Size in bytes of one stored record
            #[inline]
            #[must_use]
            pub const fn element_size(&self) -> usize {
                mem::size_of::<T>()
            }

            /// Number of records ready to read
            #[inline]
            #[must_use]
            pub fn available(&self) -> usize {
                self.shared.available()
            }

            /// Number of records that can be written before the buffer is full
            #[inline]
            #[must_use]
            pub fn free_space(&self) -> usize {
                self.shared.free_space()
            }

            /// Whether nothing is stored
            #[inline]
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.available() == 0
            }

            /// Whether every usable slot is occupied
            #[inline]
            #[must_use]
            pub fn is_full(&self) -> bool {
                self.available() == self.shared.mask
            }

            /// Fill level relative to the usable capacity, 0-100
            #[inline]
            #[must_use]
            pub fn usage_percent(&self) -> u8 {
                self.shared.usage_percent()
            }

            /// Snapshot of overrun/underrun/peak statistics
            #[must_use]
            pub fn stats(&self) -> BufferStats {
                self.shared.stats()
            }
        }

        impl<T: Copy + Send> fmt::Debug for $ty<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    .field("capacity", &self.capacity())
                    .field("available", &self.available())
                    .field("stats", &self.stats())
                    .finish()
            }
        }
    )*};
}

impl_queries!(RingBuffer, Producer, Consumer);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EegSample;
    use proptest::prelude::*;

    #[test]
    fn test_invalid_capacity() {
        for capacity in [0usize, 3, 6, 100, 513] {
            assert!(matches!(
                RingBuffer::<u32>::new(capacity),
                Err(BufferError::InvalidParam { .. })
            ));
        }
    }

    #[test]
    fn test_zero_sized_element_rejected() {
        assert!(matches!(RingBuffer::<()>::new(8), Err(BufferError::InvalidParam { .. })));
    }

    #[test]
    fn test_cold_start() {
        let mut rb = RingBuffer::<EegSample>::new(512).unwrap();
        assert!(rb.is_empty());
        assert_eq!(rb.element_size(), mem::size_of::<EegSample>());
        assert_eq!(rb.free_space(), 511);

        let sentinel = EegSample::new(42, 7);
        let mut out = sentinel;
        assert_eq!(rb.read(&mut out), Err(BufferError::BufferEmpty));
        assert_eq!(out, sentinel);
        assert_eq!(rb.stats().underruns, 1);
    }

    #[test]
    fn test_wraparound() {
        let mut rb = RingBuffer::<u32>::new(8).unwrap();
        for v in 0..7 {
            rb.write(v).unwrap();
        }

        let mut out = 0;
        for expected in 0..3 {
            rb.read(&mut out).unwrap();
            assert_eq!(out, expected);
        }

        // Four records into three free slots: the reserved slot refuses the last
        for v in 7..10 {
            rb.write(v).unwrap();
        }
        assert!(rb.is_full());
        assert_eq!(rb.write(10), Err(BufferError::BufferFull));
        assert_eq!(rb.stats().overruns, 1);

        for expected in 3..10 {
            rb.read(&mut out).unwrap();
            assert_eq!(out, expected);
        }
        assert!(rb.is_empty());

        // Cursors are now past the end of the store; keep cycling through it
        for v in 10..30 {
            rb.write(v).unwrap();
            rb.read(&mut out).unwrap();
            assert_eq!(out, v);
        }
        assert_eq!(rb.stats().overruns, 1);
    }

    #[test]
    fn test_overrun_accounting() {
        let mut rb = RingBuffer::<u32>::new(16).unwrap();
        for v in 0..15 {
            assert!(rb.write(v).is_ok());
        }
        assert!(rb.is_full());
        assert_eq!(rb.write(15), Err(BufferError::BufferFull));
        assert_eq!(rb.stats().overruns, 1);
        assert_eq!(rb.available(), 15);

        // Rejected write must not corrupt stored data
        let mut out = 0;
        for expected in 0..15 {
            rb.read(&mut out).unwrap();
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn test_peek_then_read() {
        let mut rb = RingBuffer::<u32>::new(4).unwrap();
        rb.write(11).unwrap();
        rb.write(12).unwrap();

        let mut peeked = 0;
        rb.peek(&mut peeked).unwrap();
        assert_eq!(rb.available(), 2);

        let mut read = 0;
        rb.read(&mut read).unwrap();
        assert_eq!(peeked, read);
        assert_eq!(rb.available(), 1);
    }

    #[test]
    fn test_bulk_partial_transfer() {
        let mut rb = RingBuffer::<u16>::new(8).unwrap();
        let written = rb.write_bulk(&[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(written, 7);
        assert_eq!(rb.stats().overruns, 1);
        assert_eq!(rb.stats().peak_usage, 7);

        let mut out = [0u16; 4];
        assert_eq!(rb.read_bulk(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        let mut rest = [0u16; 10];
        assert_eq!(rb.read_bulk(&mut rest), 3);
        assert_eq!(&rest[..3], &[5, 6, 7]);

        assert_eq!(rb.read_bulk(&mut rest), 0);
        assert_eq!(rb.stats().underruns, 1);
    }

    #[test]
    fn test_clear_and_stats_reset() {
        let mut rb = RingBuffer::<u8>::new(8).unwrap();
        rb.write_bulk(&[1, 2, 3]);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.free_space(), 7);

        // Cursors keep advancing after clear
        rb.write(9).unwrap();
        let mut out = 0;
        rb.read(&mut out).unwrap();
        assert_eq!(out, 9);

        rb.reset_stats();
        assert_eq!(rb.stats(), BufferStats::default());
    }

    #[test]
    fn test_usage_percent() {
        let mut rb = RingBuffer::<u8>::new(4).unwrap();
        assert_eq!(rb.usage_percent(), 0);
        rb.write_bulk(&[1, 2, 3]);
        assert_eq!(rb.usage_percent(), 100);

        let single = RingBuffer::<u8>::new(1).unwrap();
        assert!(single.is_full());
        assert_eq!(single.usage_percent(), 100);
    }

    #[test]
    fn test_split_handles_share_state() {
        let rb = RingBuffer::<u32>::new(8).unwrap();
        let (mut tx, mut rx) = rb.split();

        tx.write(1).unwrap();
        tx.write(2).unwrap();
        assert_eq!(rx.available(), 2);
        assert_eq!(tx.free_space(), 5);

        let mut out = 0;
        rx.read(&mut out).unwrap();
        assert_eq!(out, 1);
        assert_eq!(tx.available(), 1);

        drop(tx);
        rx.read(&mut out).unwrap();
        assert_eq!(out, 2);
    }

    proptest! {
        #[test]
        fn prop_non_power_of_two_rejected(capacity in 0usize..100_000) {
            let result = RingBuffer::<u32>::new(capacity);
            prop_assert_eq!(result.is_ok(), capacity.is_power_of_two());
        }

        #[test]
        fn prop_space_invariant(
            shift in 1u32..10,
            ops in proptest::collection::vec(any::<bool>(), 0..200),
        ) {
            let capacity = 1usize << shift;
            let mut rb = RingBuffer::<u32>::new(capacity).unwrap();
            let mut out = 0;
            for (i, is_write) in ops.into_iter().enumerate() {
                if is_write {
                    let _ = rb.write(i as u32);
                } else {
                    let _ = rb.read(&mut out);
                }
                prop_assert_eq!(rb.free_space() + rb.available(), capacity - 1);
            }
        }

        #[test]
        fn prop_fifo_order(values in proptest::collection::vec(any::<u32>(), 0..255)) {
            let mut rb = RingBuffer::<u32>::new(256).unwrap();
            for &v in &values {
                rb.write(v).unwrap();
            }
            let mut out = 0;
            for &v in &values {
                rb.read(&mut out).unwrap();
                prop_assert_eq!(out, v);
            }
            prop_assert!(rb.is_empty());
        }
    }
}
