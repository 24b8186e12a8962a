//! Frame buffers and the fixed-size pool they cycle through.
//!
//! A pool is an arena of [`FRAME_POOL_SIZE`] slots. Each slot pairs one
//! [`FrameBuffer`] with one [`FrameDescriptor`] and records who owns the
//! buffer right now: the pool itself, the driver's capture queue, or a
//! consumer thread running frame observers. Buffers are moved, never shared,
//! so the owner flag always agrees with where the bytes actually are.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use crate::traits::{FrameDescriptor, QueuedFrame};

/// Number of buffers allocated for every capture session.
pub const FRAME_POOL_SIZE: usize = 10;

/// Shared count of frame buffers that are still alive.
#[derive(Debug, Clone, Default)]
pub(crate) struct BufferLedger(Arc<AtomicUsize>);

impl BufferLedger {
    pub(crate) fn live(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn allocate(&self, len: usize) -> FrameBuffer {
        self.0.fetch_add(1, Ordering::AcqRel);
        FrameBuffer {
            data: vec![0; len].into_boxed_slice(),
            ledger: self.clone(),
        }
    }
}

/// A heap image buffer owned by exactly one party at a time.
pub struct FrameBuffer {
    data: Box<[u8]>,
    ledger: BufferLedger,
}

impl FrameBuffer {
    /// Buffer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer has zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read access to the bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Write access for the driver filling the buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer").field("len", &self.data.len()).finish()
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.ledger.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Who holds a slot's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotOwner {
    Pool,
    Driver,
    Consumer(ThreadId),
}

#[derive(Debug)]
struct Slot {
    owner: SlotOwner,
    buffer: Option<FrameBuffer>,
}

/// The buffers of one capture session.
#[derive(Debug)]
pub(crate) struct FrameBufferPool {
    generation: u64,
    descriptors: Vec<FrameDescriptor>,
    slots: Vec<Slot>,
}

impl FrameBufferPool {
    /// Allocate [`FRAME_POOL_SIZE`] buffers of `frame_size` bytes.
    pub(crate) fn allocate(generation: u64, frame_size: u32, ledger: &BufferLedger) -> Self {
        let descriptors = (0..FRAME_POOL_SIZE)
            .map(|index| FrameDescriptor {
                index,
                generation,
                buffer_len: frame_size,
                ancillary_len: 0,
            })
            .collect();
        let slots = (0..FRAME_POOL_SIZE)
            .map(|_| Slot {
                owner: SlotOwner::Pool,
                buffer: Some(ledger.allocate(frame_size as usize)),
            })
            .collect();
        tracing::debug!(generation, frame_size, "allocated frame buffer pool");
        Self {
            generation,
            descriptors,
            slots,
        }
    }

    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Move a pool-held buffer out for queueing; the slot becomes driver-owned.
    pub(crate) fn take_for_queue(&mut self, index: usize) -> Option<QueuedFrame> {
        let descriptor = *self.descriptors.get(index)?;
        let slot = self.slots.get_mut(index)?;
        if slot.owner != SlotOwner::Pool {
            return None;
        }
        let buffer = slot.buffer.take()?;
        slot.owner = SlotOwner::Driver;
        Some(QueuedFrame { descriptor, buffer })
    }

    /// Resolve a completed descriptor to its slot and hand the slot to the
    /// calling thread. Fails for descriptors this pool did not queue.
    pub(crate) fn hand_to_consumer(&mut self, descriptor: &FrameDescriptor, thread: ThreadId) -> bool {
        if descriptor.generation != self.generation
            || self.descriptors.get(descriptor.index) != Some(descriptor)
        {
            return false;
        }
        match self.slots.get_mut(descriptor.index) {
            Some(slot) if slot.owner == SlotOwner::Driver => {
                slot.owner = SlotOwner::Consumer(thread);
                true
            }
            _ => false,
        }
    }

    /// Record that a consumer-held buffer went back to the driver.
    pub(crate) fn mark_requeued(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.owner = SlotOwner::Driver;
        }
    }

    /// Put a buffer back into its slot. Returns the frame if it does not
    /// belong to this pool.
    pub(crate) fn restore(&mut self, frame: QueuedFrame) -> Option<QueuedFrame> {
        if frame.descriptor.generation != self.generation {
            return Some(frame);
        }
        match self.slots.get_mut(frame.descriptor.index) {
            Some(slot) if slot.buffer.is_none() => {
                slot.buffer = Some(frame.buffer);
                slot.owner = SlotOwner::Pool;
                None
            }
            _ => Some(frame),
        }
    }

    /// Whether `thread` holds one of this pool's buffers.
    pub(crate) fn held_by(&self, thread: ThreadId) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.owner == SlotOwner::Consumer(thread))
    }

    /// Buffers still away from the pool that teardown has to wait for.
    ///
    /// Slots held by `current` are skipped: that thread is running an
    /// observer and cannot hand its buffer back until teardown returns.
    /// Driver-held slots only count when the driver's queue was cleared,
    /// since only then will the driver return them.
    pub(crate) fn in_flight(&self, current: ThreadId, include_driver: bool) -> usize {
        self.slots
            .iter()
            .filter(|slot| match slot.owner {
                SlotOwner::Pool => false,
                SlotOwner::Driver => include_driver,
                SlotOwner::Consumer(thread) => thread != current,
            })
            .count()
    }

    #[cfg(test)]
    pub(crate) fn owners(&self) -> impl Iterator<Item = SlotOwner> + '_ {
        self.slots.iter().map(|slot| slot.owner)
    }

    /// Free the pool: descriptors first, then the buffers they describe.
    pub(crate) fn release(mut self) {
        let generation = self.generation;
        self.descriptors.clear();
        let freed = self.slots.drain(..).filter(|slot| slot.buffer.is_some()).count();
        tracing::debug!(generation, freed, "released frame buffer pool");
    }
}
