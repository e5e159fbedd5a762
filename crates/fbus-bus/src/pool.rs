//! Per-connection receive pool.
//!
//! An offset-addressed byte arena. Command replies (the name list) and
//! queued messages are allocated here; callers identify a region by its
//! [`PoolSlice`] and the pool hands out offsets, never pointers.
//!
//! Allocation is first-fit over a free list of non-overlapping regions kept
//! sorted by offset. All allocation sizes are rounded up to 8 bytes, so
//! every offset the pool returns is 8-byte aligned.

use std::collections::VecDeque;

use fbus_error::{BusError, Result};
use fbus_types::ConnectionId;

/// Granularity of pool allocations, in bytes.
pub const POOL_ALIGN: usize = 8;

const fn align_up(len: usize) -> usize {
    (len + POOL_ALIGN - 1) & !(POOL_ALIGN - 1)
}

/// A region handed out by [`ReceivePool::alloc`].
///
/// `len` is the requested length; the pool reserves `align_up(len)` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSlice {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, Copy)]
struct FreeRegion {
    offset: usize,
    len: usize,
}

/// A message parked in the pool, waiting for the connection to receive it.
#[derive(Debug, Clone, Copy)]
pub struct QueuedMessage {
    pub sender: ConnectionId,
    pub slice: PoolSlice,
}

/// Fixed-capacity byte arena with a queued-message ledger.
#[derive(Debug)]
pub struct ReceivePool {
    buf: Vec<u8>,
    free: Vec<FreeRegion>,
    messages: VecDeque<QueuedMessage>,
}

impl ReceivePool {
    /// Create a pool of `capacity` bytes (rounded up to [`POOL_ALIGN`]).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = align_up(capacity);
        Self {
            buf: vec![0; capacity],
            free: vec![FreeRegion {
                offset: 0,
                len: capacity,
            }],
            messages: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Total free bytes (may be fragmented).
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.iter().map(|r| r.len).sum()
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Reserve `len` bytes, first-fit.
    pub fn alloc(&mut self, len: usize) -> Result<PoolSlice> {
        let want = align_up(len.max(1));
        let Some(idx) = self.free.iter().position(|r| r.len >= want) else {
            return Err(BusError::PoolExhausted {
                requested: want,
                available: self.available(),
            });
        };

        let region = self.free[idx];
        if region.len == want {
            self.free.remove(idx);
        } else {
            self.free[idx] = FreeRegion {
                offset: region.offset + want,
                len: region.len - want,
            };
        }

        Ok(PoolSlice {
            offset: region.offset,
            len,
        })
    }

    /// Return a region to the pool, coalescing with free neighbors.
    pub fn free(&mut self, slice: PoolSlice) {
        let len = align_up(slice.len.max(1));
        let offset = slice.offset;
        debug_assert!(offset + len <= self.capacity());

        let idx = self
            .free
            .partition_point(|r| r.offset < offset);
        debug_assert!(
            idx == 0 || self.free[idx - 1].offset + self.free[idx - 1].len <= offset,
            "double free or overlap below {offset}"
        );
        debug_assert!(
            idx == self.free.len() || offset + len <= self.free[idx].offset,
            "double free or overlap above {offset}"
        );

        self.free.insert(idx, FreeRegion { offset, len });

        // Merge with the next region, then with the previous one.
        if idx + 1 < self.free.len()
            && self.free[idx].offset + self.free[idx].len == self.free[idx + 1].offset
        {
            self.free[idx].len += self.free[idx + 1].len;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].offset + self.free[idx - 1].len == self.free[idx].offset {
            self.free[idx - 1].len += self.free[idx].len;
            self.free.remove(idx);
        }
    }

    /// Copy `bytes` into `slice` at relative offset `at`.
    ///
    /// # Panics
    ///
    /// Panics if the write would overrun the slice; region sizes are computed
    /// before allocation, so an overrun is a logic bug, not a runtime
    /// condition.
    pub fn write(&mut self, slice: PoolSlice, at: usize, bytes: &[u8]) {
        assert!(
            at + bytes.len() <= slice.len,
            "write of {} bytes at +{at} overruns slice of {} bytes",
            bytes.len(),
            slice.len
        );
        let start = slice.offset + at;
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Read back an allocated region.
    #[must_use]
    pub fn read(&self, slice: PoolSlice) -> &[u8] {
        &self.buf[slice.offset..slice.offset + slice.len]
    }

    // -----------------------------------------------------------------------
    // Queued messages
    // -----------------------------------------------------------------------

    /// Park a message payload in the pool.
    pub fn enqueue_message(&mut self, sender: ConnectionId, payload: &[u8]) -> Result<()> {
        let slice = self.alloc(payload.len())?;
        self.write(slice, 0, payload);
        self.messages.push_back(QueuedMessage { sender, slice });
        Ok(())
    }

    /// Pop the oldest queued message, returning the sender and payload.
    pub fn dequeue_message(&mut self) -> Option<(ConnectionId, Vec<u8>)> {
        let msg = self.messages.pop_front()?;
        let payload = self.read(msg.slice).to_vec();
        self.free(msg.slice);
        Some((msg.sender, payload))
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Move every queued message from `src` into `dst`.
    ///
    /// Two-phase: all destination regions are reserved first, and only once
    /// every reservation succeeded are payloads copied and source regions
    /// released. A failed reservation unwinds the earlier ones and leaves
    /// both pools exactly as they were.
    pub fn move_messages(dst: &mut Self, src: &mut Self) -> Result<usize> {
        let mut reserved: Vec<PoolSlice> = Vec::with_capacity(src.messages.len());
        for msg in &src.messages {
            match dst.alloc(msg.slice.len) {
                Ok(slice) => reserved.push(slice),
                Err(err) => {
                    for slice in reserved {
                        dst.free(slice);
                    }
                    return Err(err);
                }
            }
        }

        let moved = reserved.len();
        let drained: Vec<_> = src.messages.drain(..).collect();
        for (msg, dst_slice) in drained.into_iter().zip(reserved) {
            let payload = src.buf[msg.slice.offset..msg.slice.offset + msg.slice.len].to_vec();
            dst.write(dst_slice, 0, &payload);
            dst.messages.push_back(QueuedMessage {
                sender: msg.sender,
                slice: dst_slice,
            });
            src.free(msg.slice);
        }

        Ok(moved)
    }
}
