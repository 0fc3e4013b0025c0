//! Ring buffer geometry and byte storage.
//!
//! This module provides the power-of-two primitives the journal is built on:
//! - Configuration with capacity validation
//! - Cursor-to-slot mapping using bitmasks
//! - Splitting a span at the physical end of the buffer
//! - The fixed byte store holding the most recent `capacity` appended bytes

use crate::error::JournalError;

/// Largest accepted `log2` of the ring capacity (1 GiB).
pub const MAX_RING_LOG2: u32 = 30;

/// Configuration for a journal ring buffer.
///
/// The capacity is always a power of 2, given by its exponent, enabling slot
/// calculations via bitmasking instead of modulo operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingConfig {
    log2: u32,
}

impl RingConfig {
    /// Creates a configuration holding `2^log2` bytes.
    ///
    /// # Errors
    /// Returns [`JournalError::InvalidRingSize`] if `log2` exceeds
    /// [`MAX_RING_LOG2`].
    ///
    /// # Example
    /// ```
    /// use lithos_journal::RingConfig;
    /// let cfg = RingConfig::from_log2(10).unwrap();
    /// assert_eq!(cfg.capacity(), 1024);
    /// assert!(RingConfig::from_log2(31).is_err());
    /// ```
    pub fn from_log2(log2: u32) -> Result<Self, JournalError> {
        if log2 > MAX_RING_LOG2 {
            return Err(JournalError::InvalidRingSize(log2));
        }
        Ok(Self { log2 })
    }

    #[inline(always)]
    pub fn log2(&self) -> u32 {
        self.log2
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        1usize << self.log2
    }

    /// Returns the bitmask for slot calculation.
    ///
    /// The mask is `capacity - 1`, which has all lower bits set to 1.
    /// Using `offset & mask` is equivalent to `offset % capacity`.
    ///
    /// # Example
    /// ```
    /// use lithos_journal::RingConfig;
    /// let cfg = RingConfig::from_log2(3).unwrap();
    /// assert_eq!(cfg.mask(), 7);  // 0b111 in binary
    /// ```
    #[inline(always)]
    pub fn mask(&self) -> u64 {
        (self.capacity() as u64) - 1
    }
}

/// Converts a relative byte offset to a buffer slot.
///
/// With `capacity = 8` (mask = 7 = `0b111`):
/// ```text
/// offset =  5 → 5 & 7 = 5
/// offset =  8 → 8 & 7 = 0  (wraps around)
/// offset = 15 → 15 & 7 = 7
/// ```
#[inline(always)]
pub fn offset_to_slot(offset: u64, mask: u64) -> usize {
    (offset & mask) as usize
}

/// Splits a span of `len` bytes starting at `slot` where it runs past the
/// physical end of a buffer of `capacity` bytes.
///
/// Returns `(head, tail)`: `head` bytes fit before the end, the remaining
/// `tail` bytes continue at slot 0. `tail` is zero when the span does not
/// wrap. Requires `slot < capacity` and `len <= capacity`.
///
/// ```text
/// capacity = 16, slot = 10, len = 10
///
/// |0         |10    |16
/// [TTTT......HHHHHH]
/// head = 6, tail = 4
/// ```
#[inline(always)]
pub fn split_at_wrap(slot: usize, len: usize, capacity: usize) -> (usize, usize) {
    debug_assert!(slot < capacity && len <= capacity);
    let head = len.min(capacity - slot);
    (head, len - head)
}

/// Fixed-capacity byte store indexed by relative offset modulo capacity.
pub(crate) struct RingStore {
    cfg: RingConfig,
    bytes: Box<[u8]>,
}

impl RingStore {
    pub(crate) fn new(cfg: RingConfig) -> Self {
        Self {
            cfg,
            bytes: vec![0u8; cfg.capacity()].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub(crate) fn config(&self) -> RingConfig {
        self.cfg
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.bytes.len()
    }

    #[inline(always)]
    pub(crate) fn slot(&self, offset: u64) -> usize {
        offset_to_slot(offset, self.cfg.mask())
    }

    /// Copies `src` into the buffer starting at relative `offset`, wrapping
    /// to slot 0 if needed. Returns the `(head, tail)` split used.
    pub(crate) fn copy_in(&mut self, offset: u64, src: &[u8]) -> (usize, usize) {
        let slot = self.slot(offset);
        let (head, tail) = split_at_wrap(slot, src.len(), self.capacity());
        self.bytes[slot..slot + head].copy_from_slice(&src[..head]);
        self.bytes[..tail].copy_from_slice(&src[head..]);
        (head, tail)
    }

    /// Fills `dest` from the buffer starting at relative `offset`, wrapping
    /// to slot 0 if needed.
    pub(crate) fn copy_out(&self, offset: u64, dest: &mut [u8]) {
        let slot = self.slot(offset);
        let (head, tail) = split_at_wrap(slot, dest.len(), self.capacity());
        dest[..head].copy_from_slice(&self.bytes[slot..slot + head]);
        dest[head..].copy_from_slice(&self.bytes[..tail]);
    }
}
