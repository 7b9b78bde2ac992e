//! Anonymously-mapped shared region backing a channel.

use super::header::{HeaderView, HEADER_SIZE, MIN_SLOT_SIZE};
use crate::error::{Result, WeftError};
use memmap2::MmapMut;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Mutex/condvar pair one direction of waiters parks on.
///
/// The mutex guards no data of its own; the header words are the protocol
/// state. The pair only exists so blocked peers can sleep instead of spin,
/// and every wait is bounded so a lost notify costs at most one time slice.
pub(crate) struct WaitSide {
    lock: Mutex<()>,
    cond: Condvar,
}

impl WaitSide {
    fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Acquire this side's commit/park lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Park on this side for at most `timeout`, releasing `guard` while
    /// asleep. Spurious wake-ups are expected; callers re-check the header.
    pub fn wait(&self, guard: &mut MutexGuard<'_, ()>, timeout: Duration) {
        self.cond.wait_for(guard, timeout);
    }

    /// Wake a single parked peer.
    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    /// Wake every parked peer.
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }
}

/// The shared memory region a channel lives in.
///
/// Layout: a [`HEADER_SIZE`]-byte atomic header, then `max(capacity, 1)`
/// slots of `slot_size` bytes each. The mapping is anonymous and zeroed at
/// creation; it is freed when the last channel handle drops.
pub(crate) struct SharedRegion {
    /// Keeps the mapping alive; all access goes through `base`.
    _map: MmapMut,
    base: *mut u8,
    len: usize,
    /// Slot count as configured (0 for rendezvous).
    pub capacity: u32,
    /// Slot count used for ring arithmetic: `max(capacity, 1)`.
    pub slots: u32,
    /// Per-slot byte budget.
    pub slot_size: u32,
    /// Parked senders.
    pub senders: WaitSide,
    /// Parked receivers.
    pub receivers: WaitSide,
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("slots", &self.slots)
            .field("slot_size", &self.slot_size)
            .finish()
    }
}

// SAFETY: the raw base pointer targets a mapping owned by this struct. All
// header access goes through atomics and slot bytes are only touched by the
// single peer that owns the slot between commit and consume (enforced by
// the ring protocol), so cross-thread sharing is sound.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocate and initialise a region for the given channel geometry.
    pub fn create(capacity: u32, slot_size: u32) -> Result<Self> {
        if slot_size < MIN_SLOT_SIZE {
            return Err(WeftError::RegionLayout {
                cause: format!(
                    "slot_size {} below minimum of {} bytes",
                    slot_size, MIN_SLOT_SIZE
                ),
            });
        }

        // Rendezvous channels still need one slot for the handoff.
        let slots = capacity.max(1);
        let storage = (slots as usize)
            .checked_mul(slot_size as usize)
            .ok_or_else(|| WeftError::RegionLayout {
                cause: "slot storage size overflows".to_string(),
            })?;
        let len = HEADER_SIZE
            .checked_add(storage)
            .ok_or_else(|| WeftError::RegionLayout {
                cause: "total region size overflows".to_string(),
            })?;

        let mut map = MmapMut::map_anon(len).map_err(|e| WeftError::RegionCreate {
            cause: e.to_string(),
        })?;
        let base = map.as_mut_ptr();

        let region = Self {
            _map: map,
            base,
            len,
            capacity,
            slots,
            slot_size,
            senders: WaitSide::new(),
            receivers: WaitSide::new(),
        };
        // Anonymous maps come zeroed; this publishes the geometry words.
        region.header().init(capacity, slot_size);
        Ok(region)
    }

    /// Atomic view over the header words.
    pub fn header(&self) -> HeaderView {
        // SAFETY: the mapping is at least HEADER_SIZE bytes, page-aligned,
        // and lives as long as `self`.
        unsafe { HeaderView::new(self.base) }
    }

    /// Byte offset of the slot a monotonic index maps to.
    pub fn slot_offset(&self, index: u32) -> usize {
        HEADER_SIZE + (index % self.slots) as usize * self.slot_size as usize
    }

    /// Immutable view of `len` region bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The range must lie inside the region and the caller must own it for
    /// reading: either the slot is committed and this caller is the receiver
    /// consuming it, or the region is not yet shared.
    pub unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        unsafe { std::slice::from_raw_parts(self.base.add(offset), len) }
    }

    /// Mutable view of `len` region bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The range must lie inside the region and the caller must own it for
    /// writing: the slot is reserved to this sender and unpublished (the
    /// index release-store has not happened yet).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        unsafe { std::slice::from_raw_parts_mut(self.base.add(offset), len) }
    }
}
