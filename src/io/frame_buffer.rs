//! Fixed-capacity frame handoff between the receive thread and the consumer
//!
//! A [`FrameBuffer`] is a three-slot single-producer/single-consumer buffer
//! holding the most recent raw messages of one device. The producer (socket
//! receive loop) never blocks on a full buffer, it overwrites the oldest
//! unclaimed slot; the consumer never blocks on an empty one, it simply
//! re-reads the last published slot. One mutex guards only the slot indices;
//! the payload itself is written and read under per-slot locks that are never
//! contended while the index invariant holds (the producer never claims the
//! slot the consumer is reading).

use std::sync::{Mutex, MutexGuard};

use crate::protocol::header::Timestamp;

/// Number of slots per device buffer
pub const FRAME_BUFFER_SLOTS: usize = 3;

/// One raw inbound message: full on-wire type name, timestamp and body bytes
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    /// Type name exactly as received (prefix included, e.g. `RTS_COMMAND`)
    pub type_name: String,
    /// Header timestamp of the message
    pub timestamp: Timestamp,
    /// Message body bytes
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
struct Indices {
    /// Most recently committed slot
    last: Option<usize>,
    /// Slot currently claimed by the consumer
    in_use: Option<usize>,
    /// Slot currently claimed by the producer
    in_push: Option<usize>,
    /// Set by `end_push`, cleared by `start_pull`
    updated: bool,
}

/// Three-slot SPSC handoff buffer for one device's inbound frames
#[derive(Debug, Default)]
pub struct FrameBuffer {
    indices: Mutex<Indices>,
    slots: [Mutex<RawFrame>; FRAME_BUFFER_SLOTS],
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        FRAME_BUFFER_SLOTS
    }

    /// Claim a slot for writing and return its index
    ///
    /// The candidate is the slot after `last`; if that is the slot the
    /// consumer currently holds, the next one is taken instead. With three
    /// slots a single skip suffices and the returned slot can never equal
    /// the consumer's.
    pub fn start_push(&self) -> usize {
        let mut idx = self.indices.lock().unwrap();
        let mut candidate = match idx.last {
            Some(last) => (last + 1) % FRAME_BUFFER_SLOTS,
            None => 0,
        };
        if Some(candidate) == idx.in_use {
            candidate = (candidate + 1) % FRAME_BUFFER_SLOTS;
        }
        debug_assert_ne!(Some(candidate), idx.in_use);
        idx.in_push = Some(candidate);
        candidate
    }

    /// Writable access to the slot claimed by [`FrameBuffer::start_push`]
    pub fn push_slot(&self, slot: usize) -> MutexGuard<'_, RawFrame> {
        self.slots[slot].lock().unwrap()
    }

    /// Publish the slot as the most recent complete frame
    ///
    /// Must be called only after the slot is fully populated; the frame
    /// becomes visible to the consumer at this point and not earlier.
    pub fn end_push(&self, slot: usize) {
        let mut idx = self.indices.lock().unwrap();
        idx.last = Some(slot);
        idx.in_push = None;
        idx.updated = true;
    }

    /// Claim the most recent complete frame for reading
    ///
    /// Returns `None` when nothing has been published yet. Clears the
    /// updated flag.
    pub fn start_pull(&self) -> Option<usize> {
        let mut idx = self.indices.lock().unwrap();
        idx.in_use = idx.last;
        idx.updated = false;
        idx.in_use
    }

    /// Read access to the slot claimed by [`FrameBuffer::start_pull`]
    pub fn pull_slot(&self, slot: usize) -> MutexGuard<'_, RawFrame> {
        self.slots[slot].lock().unwrap()
    }

    /// Release the consumer's claim
    pub fn end_pull(&self) {
        let mut idx = self.indices.lock().unwrap();
        idx.in_use = None;
    }

    /// Whether a new frame has been published since the last `start_pull`
    pub fn is_updated(&self) -> bool {
        self.indices.lock().unwrap().updated
    }

    /// Convenience for the producer: write one whole frame and publish it
    pub fn push_frame(&self, frame: RawFrame) {
        let slot = self.start_push();
        *self.push_slot(slot) = frame;
        self.end_push(slot);
    }

    /// Convenience for the consumer: claim, clone and release the most
    /// recent frame
    pub fn pull_frame(&self) -> Option<RawFrame> {
        let slot = self.start_pull()?;
        let frame = self.pull_slot(slot).clone();
        self.end_pull();
        Some(frame)
    }
}
