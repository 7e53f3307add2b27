//! Processing buffer pool
//!
//! A fixed set of buffers, each holding at most one admitted update. The
//! pool also owns the pending queue and the colliding list, so buffer
//! identity is a plain index and every buffer is in exactly one state.

use heapless::{Deque, Vec};

use crate::collision::UnitMask;
use crate::update::PendingUpdate;

/// Number of processing buffers
pub const MAX_UPDATES: usize = 20;

/// Index of a processing buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferId(u8);

impl BufferId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u8)
    }
}

/// Lifecycle state of a processing buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferState {
    Free,
    /// Waiting in the pending queue
    Queued,
    /// Waiting for the units in the mask to complete
    Colliding(UnitMask),
    /// Chosen by the scheduler, not yet programmed
    Dispatching,
    /// Programmed, occupying the working buffer
    Active,
}

/// Buffer counts per state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolCounts {
    pub free: usize,
    pub queued: usize,
    pub colliding: usize,
    pub dispatching: usize,
    pub active: usize,
}

impl PoolCounts {
    pub fn total(&self) -> usize {
        self.free + self.queued + self.colliding + self.dispatching + self.active
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: BufferState,
    update: Option<PendingUpdate>,
}

const EMPTY_SLOT: Slot = Slot {
    state: BufferState::Free,
    update: None,
};

/// Fixed pool of processing buffers
#[derive(Debug)]
pub struct BufferPool {
    slots: [Slot; MAX_UPDATES],
    free: Deque<BufferId, MAX_UPDATES>,
    pending: Vec<BufferId, MAX_UPDATES>,
    colliding: Vec<BufferId, MAX_UPDATES>,
    base_addr: u32,
    stride: u32,
}

impl BufferPool {
    /// Create a pool whose buffers sit `stride` bytes apart from `base_addr`
    pub fn new(base_addr: u32, stride: u32) -> Self {
        let mut free = Deque::new();
        for i in 0..MAX_UPDATES {
            // Capacity equals MAX_UPDATES, cannot overflow
            let _ = free.push_back(BufferId::from_index(i));
        }
        Self {
            slots: [EMPTY_SLOT; MAX_UPDATES],
            free,
            pending: Vec::new(),
            colliding: Vec::new(),
            base_addr,
            stride,
        }
    }

    /// Physical address of a buffer
    pub fn address(&self, id: BufferId) -> u32 {
        self.base_addr
            .wrapping_add(self.stride.wrapping_mul(id.0 as u32))
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// True if every buffer is free
    pub fn is_drained(&self) -> bool {
        self.free.len() == MAX_UPDATES
    }

    /// Take a free buffer for `update` and append it to the pending queue
    pub fn admit(&mut self, update: PendingUpdate) -> Option<BufferId> {
        let id = self.free.pop_front()?;
        let slot = &mut self.slots[id.index()];
        slot.state = BufferState::Queued;
        slot.update = Some(update);
        // Pending can never hold more than the pool size
        let _ = self.pending.push(id);
        Some(id)
    }

    pub fn state(&self, id: BufferId) -> BufferState {
        self.slots[id.index()].state
    }

    pub fn update(&self, id: BufferId) -> Option<&PendingUpdate> {
        self.slots[id.index()].update.as_ref()
    }

    pub fn update_mut(&mut self, id: BufferId) -> Option<&mut PendingUpdate> {
        self.slots[id.index()].update.as_mut()
    }

    /// Pending queue, oldest first
    pub fn pending(&self) -> &[BufferId] {
        &self.pending
    }

    /// Colliding list, oldest first
    pub fn colliding(&self) -> &[BufferId] {
        &self.colliding
    }

    /// Remove the pending entry at `index` for dispatch
    pub fn take_pending(&mut self, index: usize) -> BufferId {
        let id = self.pending.remove(index);
        self.slots[id.index()].state = BufferState::Dispatching;
        id
    }

    /// Remove the colliding entry at `index` for dispatch
    pub fn take_colliding(&mut self, index: usize) -> BufferId {
        let id = self.colliding.remove(index);
        self.slots[id.index()].state = BufferState::Dispatching;
        id
    }

    /// Park a buffer on the colliding list until `mask` clears
    pub fn defer(&mut self, id: BufferId, mask: UnitMask) {
        self.pending.retain(|&p| p != id);
        self.colliding.retain(|&c| c != id);
        self.slots[id.index()].state = BufferState::Colliding(mask);
        let _ = self.colliding.push(id);
    }

    /// Buffer has been programmed and occupies the working buffer
    pub fn mark_active(&mut self, id: BufferId) {
        self.slots[id.index()].state = BufferState::Active;
    }

    /// Return a buffer to the free list, handing back its update
    pub fn release(&mut self, id: BufferId) -> Option<PendingUpdate> {
        let slot = &mut self.slots[id.index()];
        if slot.state == BufferState::Free {
            return None;
        }
        slot.state = BufferState::Free;
        let update = slot.update.take();
        self.pending.retain(|&p| p != id);
        self.colliding.retain(|&c| c != id);
        let _ = self.free.push_back(id);
        update
    }

    /// Collision mask of a colliding buffer
    pub fn collision_mask(&self, id: BufferId) -> Option<UnitMask> {
        match self.state(id) {
            BufferState::Colliding(mask) => Some(mask),
            _ => None,
        }
    }

    /// Replace the collision mask of a colliding buffer
    pub fn set_collision_mask(&mut self, id: BufferId, mask: UnitMask) {
        let slot = &mut self.slots[id.index()];
        if let BufferState::Colliding(_) = slot.state {
            slot.state = BufferState::Colliding(mask);
        }
    }

    /// Drop `unit` from every colliding entry's mask
    pub fn clear_unit(&mut self, unit: usize) {
        for id in self.colliding.iter() {
            let slot = &mut self.slots[id.index()];
            if let BufferState::Colliding(mask) = slot.state {
                slot.state = BufferState::Colliding(mask.without(unit));
            }
        }
    }

    pub fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts::default();
        for slot in self.slots.iter() {
            match slot.state {
                BufferState::Free => counts.free += 1,
                BufferState::Queued => counts.queued += 1,
                BufferState::Colliding(_) => counts.colliding += 1,
                BufferState::Dispatching => counts.dispatching += 1,
                BufferState::Active => counts.active += 1,
            }
        }
        counts
    }
}
