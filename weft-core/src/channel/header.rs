//! Atomic header over a channel region.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Fixed size of the channel header in bytes: seven u32 words.
pub const HEADER_SIZE: usize = 28;

/// Smallest permitted slot budget: the 4-byte length prefix plus 4 payload
/// bytes.
pub const MIN_SLOT_SIZE: u32 = 8;

const OFF_CAPACITY: usize = 0;
const OFF_WRITE_INDEX: usize = 4;
const OFF_READ_INDEX: usize = 8;
const OFF_CLOSED: usize = 12;
const OFF_SLOT_SIZE: usize = 16;
const OFF_WAITING_SENDERS: usize = 20;
const OFF_WAITING_RECEIVERS: usize = 24;

/// View over the seven header words of a channel region.
///
/// `capacity` and `slot_size` are set once at creation and never mutated.
/// `write_index` and `read_index` are the release/acquire publication pair:
/// a reader that acquire-loads an index value observes every slot byte
/// written before the matching release-store. The remaining words are
/// bookkeeping and use relaxed or sequentially-consistent access as noted.
pub(crate) struct HeaderView {
    base: *mut u8,
}

impl HeaderView {
    /// Create a view over a region's first [`HEADER_SIZE`] bytes.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`HEADER_SIZE`] bytes that remain valid
    /// and 4-byte aligned for the lifetime of the view, and all concurrent
    /// access to those bytes must go through `HeaderView` atomics.
    pub unsafe fn new(base: *mut u8) -> Self {
        Self { base }
    }

    fn word(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset + 4 <= HEADER_SIZE);
        // SAFETY: construction guarantees the header bytes are valid and
        // aligned; all access goes through this atomic view.
        unsafe { &*(self.base.add(offset) as *const AtomicU32) }
    }

    /// Initialise the immutable geometry words. Called once at creation,
    /// before the region is shared.
    pub fn init(&self, capacity: u32, slot_size: u32) {
        self.word(OFF_CAPACITY).store(capacity, Ordering::Relaxed);
        self.word(OFF_SLOT_SIZE).store(slot_size, Ordering::Relaxed);
        self.word(OFF_WRITE_INDEX).store(0, Ordering::Relaxed);
        self.word(OFF_READ_INDEX).store(0, Ordering::Relaxed);
        self.word(OFF_CLOSED).store(0, Ordering::Relaxed);
        self.word(OFF_WAITING_SENDERS).store(0, Ordering::Relaxed);
        self.word(OFF_WAITING_RECEIVERS).store(0, Ordering::Relaxed);
    }

    pub fn capacity(&self) -> u32 {
        self.word(OFF_CAPACITY).load(Ordering::Relaxed)
    }

    pub fn slot_size(&self) -> u32 {
        self.word(OFF_SLOT_SIZE).load(Ordering::Relaxed)
    }

    pub fn write_index(&self, order: Ordering) -> u32 {
        self.word(OFF_WRITE_INDEX).load(order)
    }

    /// Publish a committed slot. Pairs with acquire loads on the reader side.
    pub fn store_write_index(&self, value: u32) {
        self.word(OFF_WRITE_INDEX).store(value, Ordering::Release);
    }

    pub fn read_index(&self, order: Ordering) -> u32 {
        self.word(OFF_READ_INDEX).load(order)
    }

    /// Publish a consumed slot. Pairs with acquire loads on the writer side.
    pub fn store_read_index(&self, value: u32) {
        self.word(OFF_READ_INDEX).store(value, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.word(OFF_CLOSED).load(Ordering::SeqCst) != 0
    }

    /// Mark the channel closed. Returns true if this call performed the
    /// open-to-closed transition.
    pub fn set_closed(&self) -> bool {
        self.word(OFF_CLOSED).swap(1, Ordering::SeqCst) == 0
    }

    pub fn waiting_senders(&self) -> u32 {
        self.word(OFF_WAITING_SENDERS).load(Ordering::SeqCst)
    }

    pub fn add_waiting_sender(&self) {
        self.word(OFF_WAITING_SENDERS)
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn sub_waiting_sender(&self) {
        self.word(OFF_WAITING_SENDERS)
            .fetch_sub(1, Ordering::SeqCst);
    }

    pub fn waiting_receivers(&self) -> u32 {
        self.word(OFF_WAITING_RECEIVERS).load(Ordering::SeqCst)
    }

    pub fn add_waiting_receiver(&self) {
        self.word(OFF_WAITING_RECEIVERS)
            .fetch_add(1, Ordering::SeqCst);
    }

    pub fn sub_waiting_receiver(&self) {
        self.word(OFF_WAITING_RECEIVERS)
            .fetch_sub(1, Ordering::SeqCst);
    }

    /// Take a point-in-time snapshot of all seven words.
    pub fn snapshot(&self) -> ChannelStatus {
        ChannelStatus {
            capacity: self.capacity(),
            slot_size: self.slot_size(),
            write_index: self.write_index(Ordering::Acquire),
            read_index: self.read_index(Ordering::Acquire),
            closed: self.is_closed(),
            waiting_senders: self.waiting_senders(),
            waiting_receivers: self.waiting_receivers(),
        }
    }
}

/// Point-in-time snapshot of a channel header, for diagnostics.
///
/// Values are advisory: the header may change between the snapshot and any
/// decision taken on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Slot count fixed at creation (0 for rendezvous channels).
    pub capacity: u32,
    /// Per-slot byte budget fixed at creation.
    pub slot_size: u32,
    /// Count of slots committed so far.
    pub write_index: u32,
    /// Count of slots consumed so far.
    pub read_index: u32,
    /// Whether the channel has been closed.
    pub closed: bool,
    /// Senders currently parked waiting for space or a receiver.
    pub waiting_senders: u32,
    /// Receivers currently parked waiting for data.
    pub waiting_receivers: u32,
}

impl ChannelStatus {
    /// Number of committed-but-unconsumed slots at snapshot time.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.write_index - self.read_index
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "len={}/{} write={} read={} closed={} waiters={}s/{}r",
            self.in_flight(),
            self.capacity,
            self.write_index,
            self.read_index,
            self.closed,
            self.waiting_senders,
            self.waiting_receivers,
        )
    }
}
