//! Wait-free single-producer / single-consumer ring buffer.
//!
//! Moves audio samples from the control context (producer) to the
//! real-time render context (consumer). The shared region holds the
//! storage and two cursors; each cursor has exactly one writer:
//!
//! ```text
//!   write  written by Producer, read (Acquire) by Consumer
//!   read   written by Consumer, read (Acquire) by Producer
//! ```
//!
//! One slot is always left empty so that `read == write` means empty and
//! `write + 1 == read` means full. Capacity is therefore `slots - 1`.
//! Neither side ever blocks, spins, or allocates after construction.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps the two cursors on separate cache lines.
#[repr(C, align(64))]
struct CachePadded<T> {
    value: T,
}

struct Region<T> {
    write: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
    storage: Box<[UnsafeCell<T>]>,
}

// SAFETY: storage is only touched through Producer (slots between write and
// read - 1) and Consumer (slots between read and write). The Release store of
// a cursor publishes the slot contents before the other side can observe the
// new cursor with Acquire, so the two sides never access the same slot
// concurrently.
unsafe impl<T: Send> Sync for Region<T> {}

impl<T> Region<T> {
    #[inline]
    fn slots(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    fn readable(&self, read: usize, write: usize) -> usize {
        (write + self.slots() - read) % self.slots()
    }

    #[inline]
    fn writable(&self, read: usize, write: usize) -> usize {
        self.slots() - 1 - self.readable(read, write)
    }

    /// Pointer to slot `index`. `UnsafeCell<T>` is `repr(transparent)`, so
    /// the slots form one contiguous run of `T`.
    #[inline]
    fn slot_ptr(&self, index: usize) -> *mut T {
        debug_assert!(index <= self.slots());
        // SAFETY: index is at most one past the end of the allocation.
        UnsafeCell::raw_get(unsafe { self.storage.as_ptr().add(index) })
    }

    fn snapshot(&self) -> (usize, usize) {
        (
            self.read.value.load(Ordering::Acquire),
            self.write.value.load(Ordering::Acquire),
        )
    }
}

/// Pre-sized shared region, split once into its two endpoints.
pub struct RingBuffer<T> {
    region: Arc<Region<T>>,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Allocate `slots` slots, holding at most `slots - 1` elements.
    ///
    /// # Panics
    /// If `slots` is zero.
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "ring buffer needs at least one slot");
        let storage = (0..slots).map(|_| UnsafeCell::new(T::default())).collect();
        Self {
            region: Arc::new(Region {
                write: CachePadded {
                    value: AtomicUsize::new(0),
                },
                read: CachePadded {
                    value: AtomicUsize::new(0),
                },
                storage,
            }),
        }
    }

    /// Maximum number of elements held at once.
    pub fn capacity(&self) -> usize {
        self.region.slots() - 1
    }

    /// Hand out the two endpoints. The region is freed once both are
    /// dropped.
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        (
            Producer {
                region: Arc::clone(&self.region),
            },
            Consumer {
                region: self.region,
            },
        )
    }
}

macro_rules! advisory_queries {
    () => {
        /// Maximum number of elements held at once.
        pub fn capacity(&self) -> usize {
            self.region.slots() - 1
        }

        /// Elements ready to pop. Advisory when read from the producer.
        pub fn available_read(&self) -> usize {
            let (read, write) = self.region.snapshot();
            self.region.readable(read, write)
        }

        /// Free slots ready to push. Advisory when read from the consumer.
        pub fn available_write(&self) -> usize {
            let (read, write) = self.region.snapshot();
            self.region.writable(read, write)
        }

        pub fn is_empty(&self) -> bool {
            self.available_read() == 0
        }

        pub fn is_full(&self) -> bool {
            self.available_write() == 0
        }
    };
}

// ── Producer ──────────────────────────────────────────────────────

/// Writing endpoint. Exactly one exists per region.
pub struct Producer<T> {
    region: Arc<Region<T>>,
}

impl<T: Copy> Producer<T> {
    /// Copy as many leading `elements` as fit. Returns how many were
    /// written; 0 when the buffer is full. Never overwrites unread data.
    pub fn push(&mut self, elements: &[T]) -> usize {
        let region = &*self.region;
        let read = region.read.value.load(Ordering::Acquire);
        let write = region.write.value.load(Ordering::Relaxed);

        let count = region.writable(read, write).min(elements.len());
        if count == 0 {
            return 0;
        }

        let tail = (region.slots() - write).min(count);
        let head = count - tail;
        // SAFETY: [write, write + tail) and [0, head) are free slots owned by
        // the producer until the store below; `elements` cannot alias them.
        unsafe {
            ptr::copy_nonoverlapping(elements.as_ptr(), region.slot_ptr(write), tail);
            ptr::copy_nonoverlapping(elements.as_ptr().add(tail), region.slot_ptr(0), head);
        }

        region
            .write
            .value
            .store((write + count) % region.slots(), Ordering::Release);
        count
    }

    advisory_queries!();
}

// ── Consumer ──────────────────────────────────────────────────────

/// Reading endpoint. Exactly one exists per region.
pub struct Consumer<T> {
    region: Arc<Region<T>>,
}

impl<T: Copy> Consumer<T> {
    /// Copy up to `out.len()` unread elements into `out`, oldest first.
    /// Returns how many were copied.
    pub fn pop(&mut self, out: &mut [T]) -> usize {
        let region = &*self.region;
        let write = region.write.value.load(Ordering::Acquire);
        let read = region.read.value.load(Ordering::Relaxed);

        let count = region.readable(read, write).min(out.len());
        if count == 0 {
            return 0;
        }

        let tail = (region.slots() - read).min(count);
        let head = count - tail;
        // SAFETY: [read, read + tail) and [0, head) were published by the
        // producer's Release store and stay untouched until ours below.
        unsafe {
            ptr::copy_nonoverlapping(region.slot_ptr(read), out.as_mut_ptr(), tail);
            ptr::copy_nonoverlapping(region.slot_ptr(0), out.as_mut_ptr().add(tail), head);
        }

        region
            .read
            .value
            .store((read + count) % region.slots(), Ordering::Release);
        count
    }

    /// Discard everything currently readable by moving the read cursor to
    /// a snapshot of the write cursor.
    pub fn clear(&mut self) {
        let write = self.region.write.value.load(Ordering::Acquire);
        self.region.read.value.store(write, Ordering::Release);
    }

    advisory_queries!();
}
