//! Byte ring buffer living inside a shared memory region.
//!
//! Layout of a queue occupying `[start, start + length)`:
//!
//! ```text
//! offset 0  head         i32  next index to read (consumer only)
//! offset 4  tail         i32  next free index (producer only)
//! offset 8  initialized  u8
//! offset 9  closed       u8
//! offset 10 payload      length - 10 slots, one kept free
//! ```
//!
//! Indices are relative to `start` so that two processes mapping the same
//! file at different addresses agree on them. No lock is shared between the
//! processes: the consumer is the only writer of `head` and the producer the
//! only writer of `tail`.

use crate::error::{Error, Result};
use memmap2::{MmapOptions, MmapRaw};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

const HEAD_OFFSET: usize = 0;
const TAIL_OFFSET: usize = 4;
const INITIALIZED_OFFSET: usize = 8;
const CLOSED_OFFSET: usize = 9;

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 2;
const INITIALIZED: u8 = 1;

/// Fixed-capacity byte queue over a region of a memory map.
pub struct RingBufferQueue {
    map: Arc<MmapRaw>,
    start: usize,
    length: usize,
}

impl RingBufferQueue {
    /// Size of the header preceding the payload ring.
    pub const HEADER_SIZE: usize = 10;

    /// Smallest region that still holds one usable byte.
    pub const MIN_LENGTH: usize = Self::HEADER_SIZE + 2;

    /// Creates a queue view over `[start, start + length)` of `map`.
    ///
    /// The header is not touched; call [`init`](Self::init) before use.
    ///
    /// # Errors
    /// Returns a state error if the region is out of bounds, misaligned or
    /// too small to hold a single byte.
    pub fn new(map: Arc<MmapRaw>, start: usize, length: usize) -> Result<Self> {
        if length < Self::MIN_LENGTH {
            return Err(Error::state(format!(
                "queue region of {length} bytes is smaller than {}",
                Self::MIN_LENGTH
            )));
        }
        if length > i32::MAX as usize {
            return Err(Error::state(format!("queue region of {length} bytes is too large")));
        }
        let end = start
            .checked_add(length)
            .filter(|end| *end <= map.len())
            .ok_or_else(|| {
                Error::state(format!(
                    "queue region {start}..{} exceeds mapping of {} bytes",
                    start.saturating_add(length),
                    map.len()
                ))
            })?;
        debug_assert!(end > start);

        let addr = map.as_mut_ptr() as usize + start;
        if addr % std::mem::align_of::<AtomicI32>() != 0 {
            return Err(Error::state(format!(
                "queue region at offset {start} is not 4-byte aligned"
            )));
        }

        Ok(Self { map, start, length })
    }

    /// Creates a queue over a private anonymous mapping of `length` bytes.
    ///
    /// Useful for in-process use and tests; the queue is already initialized.
    ///
    /// # Errors
    /// Returns an error if the mapping cannot be created or `length` is too small.
    pub fn anonymous(length: usize) -> Result<Self> {
        let map = MmapOptions::new().len(length).map_anon()?;
        let queue = Self::new(Arc::new(MmapRaw::from(map)), 0, length)?;
        queue.init();
        Ok(queue)
    }

    /// Returns the region length required for a queue holding `capacity` bytes.
    #[must_use]
    pub const fn required_length(capacity: usize) -> usize {
        capacity + Self::HEADER_SIZE + 1
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        // SAFETY: `new` checked that `start + length` lies within the mapping.
        unsafe { self.map.as_mut_ptr().add(self.start) }
    }

    #[inline]
    fn head(&self) -> &AtomicI32 {
        // SAFETY: in bounds and 4-byte aligned (checked in `new`); the mapping
        // outlives `self` through the `Arc`.
        unsafe { &*(self.base().add(HEAD_OFFSET) as *const AtomicI32) }
    }

    #[inline]
    fn tail(&self) -> &AtomicI32 {
        // SAFETY: see `head`.
        unsafe { &*(self.base().add(TAIL_OFFSET) as *const AtomicI32) }
    }

    #[inline]
    fn initialized(&self) -> &AtomicU8 {
        // SAFETY: single byte, always aligned.
        unsafe { &*(self.base().add(INITIALIZED_OFFSET) as *const AtomicU8) }
    }

    #[inline]
    fn closed(&self) -> &AtomicU8 {
        // SAFETY: single byte, always aligned.
        unsafe { &*(self.base().add(CLOSED_OFFSET) as *const AtomicU8) }
    }

    #[inline]
    const fn payload_start(&self) -> usize {
        Self::HEADER_SIZE
    }

    #[inline]
    const fn payload_end(&self) -> usize {
        self.length - 1
    }

    #[inline]
    fn next(&self, index: usize) -> usize {
        if index + 1 > self.payload_end() {
            self.payload_start()
        } else {
            index + 1
        }
    }

    /// Sets up the header unless the other side already did.
    ///
    /// Exactly one caller claims the header and writes it; concurrent
    /// callers wait until that write is published, so data offered after
    /// the first `init` is never reset by a later one.
    pub fn init(&self) {
        match self.initialized().compare_exchange(
            UNINITIALIZED,
            INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let start = self.payload_start() as i32;
                self.head().store(start, Ordering::Relaxed);
                self.tail().store(start, Ordering::Relaxed);
                self.closed().store(0, Ordering::Relaxed);
                self.initialized().store(INITIALIZED, Ordering::Release);
            }
            Err(_) => {
                while !self.is_initialized() {
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Returns true once either side has run [`init`](Self::init).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized().load(Ordering::Acquire) == INITIALIZED
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::state("ring buffer queue used before init"))
        }
    }

    /// Loads and validates `(head, tail)`.
    fn indices(&self) -> Result<(usize, usize)> {
        self.ensure_initialized()?;
        let head = self.head().load(Ordering::Acquire);
        let tail = self.tail().load(Ordering::Acquire);
        let range = self.payload_start() as i32..=self.payload_end() as i32;
        if !range.contains(&head) || !range.contains(&tail) {
            return Err(Error::state(format!(
                "corrupt ring buffer header: head={head} tail={tail} length={}",
                self.length
            )));
        }
        Ok((head as usize, tail as usize))
    }

    /// Number of usable payload bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.length - Self::HEADER_SIZE - 1
    }

    /// Number of bytes currently queued.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn size(&self) -> Result<usize> {
        let (head, tail) = self.indices()?;
        Ok(if tail >= head {
            tail - head
        } else {
            (tail - self.payload_start()) + (self.payload_end() - head) + 1
        })
    }

    /// Returns true if no bytes are queued.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Returns true if no more bytes fit.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn is_full(&self) -> Result<bool> {
        Ok(self.size()? == self.capacity())
    }

    /// Appends one byte; returns `false` if the queue is full.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn offer(&mut self, byte: u8) -> Result<bool> {
        Ok(self.offer_slice(&[byte])? == 1)
    }

    /// Removes the oldest byte, or returns `None` if the queue is empty.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn poll(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        Ok((self.poll_slice(&mut byte)? == 1).then_some(byte[0]))
    }

    /// Returns the oldest byte without removing it.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn peek(&self) -> Result<Option<u8>> {
        let (head, tail) = self.indices()?;
        if head == tail {
            return Ok(None);
        }
        // SAFETY: `head` was validated to lie within the payload.
        Ok(Some(unsafe { self.base().add(head).read() }))
    }

    /// Appends as many bytes of `src` as fit and returns how many were taken.
    ///
    /// Publishes the new tail once, after all bytes are in place.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn offer_slice(&mut self, src: &[u8]) -> Result<usize> {
        let (head, mut tail) = self.indices()?;
        let mut written = 0;
        for &byte in src {
            let next = self.next(tail);
            if next == head {
                break;
            }
            // SAFETY: `tail` lies within the payload and the consumer never
            // reads the slot until the new tail is published.
            unsafe { self.base().add(tail).write(byte) };
            tail = next;
            written += 1;
        }
        if written > 0 {
            self.tail().store(tail as i32, Ordering::Release);
        }
        Ok(written)
    }

    /// Moves up to `dst.len()` queued bytes into `dst` and returns the count.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn poll_slice(&mut self, dst: &mut [u8]) -> Result<usize> {
        let (mut head, tail) = self.indices()?;
        let mut read = 0;
        while read < dst.len() && head != tail {
            // SAFETY: slots between head and tail were published by the producer.
            dst[read] = unsafe { self.base().add(head).read() };
            head = self.next(head);
            read += 1;
        }
        if read > 0 {
            self.head().store(head as i32, Ordering::Release);
        }
        Ok(read)
    }

    /// Marks the queue closed. There is no way to reopen it.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn close(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.closed().store(1, Ordering::Release);
        Ok(())
    }

    /// Returns true once either side closed the queue.
    ///
    /// # Errors
    /// Returns a state error before `init`.
    pub fn is_closed(&self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.closed().load(Ordering::Acquire) == 1)
    }
}

impl std::fmt::Debug for RingBufferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBufferQueue")
            .field("start", &self.start)
            .field("length", &self.length)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
