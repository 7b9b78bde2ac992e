//! The channel ring protocol: send, receive, close.

use super::drain::Drain;
use super::header::ChannelStatus;
use super::region::SharedRegion;
use crate::error::{Result, WeftError};
use crate::sizing;
use crate::value::Value;
use byteorder::{ByteOrder, LittleEndian};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on any single park before header preconditions are
/// re-checked. Bounds latency after close and tolerates lost wake-ups.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Bytes of the per-slot length prefix.
const LEN_PREFIX: usize = 4;

/// Construction parameters for a channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Slot count; 0 selects rendezvous mode.
    pub capacity: u32,
    /// Per-slot byte budget, including the 4-byte length prefix.
    pub slot_size: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            slot_size: 256,
        }
    }
}

impl ChannelConfig {
    /// Set the slot count.
    #[must_use]
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the per-slot byte budget.
    #[must_use]
    pub fn with_slot_size(mut self, slot_size: u32) -> Self {
        self.slot_size = slot_size;
        self
    }

    /// Select rendezvous mode (capacity 0).
    #[must_use]
    pub fn rendezvous(mut self) -> Self {
        self.capacity = 0;
        self
    }

    /// Derive the slot budget from a sample payload.
    pub fn for_sample(mut self, sample: &Value) -> Result<Self> {
        self.slot_size = sizing::slot_budget(sample)?;
        Ok(self)
    }

    /// Create a channel with this configuration.
    pub fn create(&self) -> Result<Channel> {
        Channel::create(self.capacity, self.slot_size)
    }
}

/// A bounded or rendezvous FIFO over a shared memory region.
///
/// Handles are cheap clones sharing one region; any number of threads may
/// send and receive concurrently. Values travel as length-prefixed byte
/// payloads; per channel, consumption order equals commit order.
#[derive(Clone)]
pub struct Channel {
    region: Arc<SharedRegion>,
}

impl Channel {
    /// Create a channel with `capacity` slots of `slot_size` bytes each.
    ///
    /// `capacity` 0 creates a rendezvous channel: a value transfers only
    /// when a sender and a parked receiver meet.
    ///
    /// # Errors
    ///
    /// `RegionLayout` if `slot_size` is below the 8-byte minimum or the
    /// region size overflows; `RegionCreate` if the mapping fails.
    pub fn create(capacity: u32, slot_size: u32) -> Result<Self> {
        let region = SharedRegion::create(capacity, slot_size)?;
        tracing::debug!(capacity, slot_size, "created channel");
        Ok(Self {
            region: Arc::new(region),
        })
    }

    /// Slot count the channel was created with (0 for rendezvous).
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.region.capacity
    }

    /// Per-slot byte budget the channel was created with.
    #[must_use]
    pub fn slot_size(&self) -> u32 {
        self.region.slot_size
    }

    /// Largest payload the channel can carry.
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.region.slot_size as usize - LEN_PREFIX
    }

    /// Send a value, blocking while the buffer is full (or, on a rendezvous
    /// channel, until a receiver takes the value).
    ///
    /// # Errors
    ///
    /// `Closed` if the channel is closed at any attempt; `PayloadTooLarge`
    /// if the encoded value exceeds the slot budget; `Serialization` if the
    /// value cannot be encoded.
    pub fn send(&self, value: &Value) -> Result<()> {
        let payload = self.encode(value)?;
        if self.region.capacity == 0 {
            self.send_rendezvous(&payload)
        } else {
            self.send_buffered(&payload)
        }
    }

    /// Attempt a send without blocking. Returns `Ok(false)` when the buffer
    /// is full or, on a rendezvous channel, when no receiver is parked.
    ///
    /// A rendezvous `try_send` does not wait for consumption; the parked
    /// receiver it observed is guaranteed to drain the slot.
    pub fn try_send(&self, value: &Value) -> Result<bool> {
        let payload = self.encode(value)?;
        let header = self.region.header();
        if header.is_closed() {
            return Err(WeftError::Closed);
        }

        let guard = self.region.senders.lock();
        let write = header.write_index(Ordering::Relaxed);
        let read = header.read_index(Ordering::Acquire);
        let ready = if self.region.capacity == 0 {
            write == read && header.waiting_receivers() > 0
        } else {
            write - read < self.region.capacity
        };
        if !ready {
            return Ok(false);
        }

        self.commit(write, &payload);
        drop(guard);
        self.region.receivers.notify_one();
        Ok(true)
    }

    /// Receive the next value, blocking while the channel is empty.
    ///
    /// # Errors
    ///
    /// `ClosedAndEmpty` once the channel is closed and drained;
    /// `Deserialization` if the slot bytes cannot be decoded (the slot is
    /// not consumed in that case).
    pub fn receive(&self) -> Result<Value> {
        let header = self.region.header();
        loop {
            {
                let mut guard = self.region.receivers.lock();
                let write = header.write_index(Ordering::Acquire);
                let read = header.read_index(Ordering::Relaxed);
                if write != read {
                    let value = self.consume(read)?;
                    header.store_read_index(read + 1);
                    drop(guard);
                    self.wake_senders();
                    return Ok(value);
                }
                if header.is_closed() {
                    return Err(WeftError::ClosedAndEmpty);
                }

                header.add_waiting_receiver();
                // A rendezvous sender is watching this counter.
                self.region.senders.notify_one();
                self.region.receivers.wait(&mut guard, WAIT_SLICE);
                header.sub_waiting_receiver();
            }
        }
    }

    /// Attempt a receive without blocking. Returns `Ok(None)` when the
    /// channel is empty but still open.
    pub fn try_receive(&self) -> Result<Option<Value>> {
        let header = self.region.header();
        let guard = self.region.receivers.lock();
        let write = header.write_index(Ordering::Acquire);
        let read = header.read_index(Ordering::Relaxed);
        if write != read {
            let value = self.consume(read)?;
            header.store_read_index(read + 1);
            drop(guard);
            self.wake_senders();
            return Ok(Some(value));
        }
        if header.is_closed() {
            return Err(WeftError::ClosedAndEmpty);
        }
        Ok(None)
    }

    /// Close the channel and wake every parked sender and receiver.
    /// Idempotent; buffered values remain receivable until drained.
    pub fn close(&self) {
        let header = self.region.header();
        if header.set_closed() {
            tracing::debug!(status = %header.snapshot(), "closed channel");
        }
        self.region.senders.notify_all();
        self.region.receivers.notify_all();
    }

    /// Advisory: whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.region.header().is_closed()
    }

    /// Advisory: whether at least one committed value is unconsumed.
    #[must_use]
    pub fn has_data(&self) -> bool {
        let header = self.region.header();
        header.write_index(Ordering::Acquire) != header.read_index(Ordering::Acquire)
    }

    /// Diagnostic snapshot of the header words.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.region.header().snapshot()
    }

    /// Lazily receive values until the channel is closed and drained.
    ///
    /// Equivalent to looping on [`Channel::receive`] until `ClosedAndEmpty`;
    /// dropping the iterator leaves the channel otherwise unchanged.
    #[must_use]
    pub fn drain(&self) -> Drain<'_> {
        Drain::new(self)
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let payload = value.to_bytes()?;
        let max = self.max_payload();
        if payload.len() > max {
            return Err(WeftError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        Ok(payload)
    }

    fn send_buffered(&self, payload: &[u8]) -> Result<()> {
        let header = self.region.header();
        loop {
            if header.is_closed() {
                return Err(WeftError::Closed);
            }

            {
                let mut guard = self.region.senders.lock();
                let write = header.write_index(Ordering::Relaxed);
                let read = header.read_index(Ordering::Acquire);
                if write - read < self.region.capacity {
                    self.commit(write, payload);
                    drop(guard);
                    self.region.receivers.notify_one();
                    return Ok(());
                }

                header.add_waiting_sender();
                self.region.senders.wait(&mut guard, WAIT_SLICE);
                header.sub_waiting_sender();
            }
        }
    }

    fn send_rendezvous(&self, payload: &[u8]) -> Result<()> {
        let header = self.region.header();

        // Phase one: commit only once a receiver is parked and the single
        // slot is free, so no slot is ever committed unobserved.
        let committed = loop {
            if header.is_closed() {
                return Err(WeftError::Closed);
            }

            {
                let mut guard = self.region.senders.lock();
                let write = header.write_index(Ordering::Relaxed);
                let read = header.read_index(Ordering::Acquire);
                if write == read && header.waiting_receivers() > 0 {
                    self.commit(write, payload);
                    drop(guard);
                    self.region.receivers.notify_all();
                    break write + 1;
                }

                header.add_waiting_sender();
                self.region.senders.wait(&mut guard, WAIT_SLICE);
                header.sub_waiting_sender();
            }
        };

        // Phase two: the handoff completes when the receiver consumes the
        // slot. Close after our commit still delivers the value, so it does
        // not fail the send.
        loop {
            if header.read_index(Ordering::Acquire) >= committed || header.is_closed() {
                return Ok(());
            }

            let mut guard = self.region.senders.lock();
            if header.read_index(Ordering::Acquire) >= committed || header.is_closed() {
                return Ok(());
            }
            header.add_waiting_sender();
            self.region.senders.wait(&mut guard, WAIT_SLICE);
            header.sub_waiting_sender();
        }
    }

    /// Write the length-prefixed payload into slot `index` and publish it.
    ///
    /// Callers hold the sender lock, which makes the slot exclusively ours
    /// until the release store.
    fn commit(&self, index: u32, payload: &[u8]) {
        let offset = self.region.slot_offset(index);
        // SAFETY: the occupancy check guarantees slot `index` is unpublished
        // and its previous occupant (if any) has been consumed.
        let slot = unsafe {
            self.region
                .bytes_mut(offset, LEN_PREFIX + payload.len())
        };
        LittleEndian::write_u32(&mut slot[..LEN_PREFIX], payload.len() as u32);
        slot[LEN_PREFIX..].copy_from_slice(payload);
        self.region.header().store_write_index(index + 1);
    }

    /// Decode the payload in slot `index` without consuming it; the caller
    /// advances `read_index` only on success.
    fn consume(&self, index: u32) -> Result<Value> {
        let offset = self.region.slot_offset(index);
        // SAFETY: slot `index` is committed (write_index was acquire-loaded
        // past it) and this receiver holds the receiver lock.
        let prefix = unsafe { self.region.bytes(offset, LEN_PREFIX) };
        let len = LittleEndian::read_u32(prefix) as usize;
        if len > self.max_payload() {
            return Err(WeftError::Deserialization {
                cause: format!(
                    "length prefix {} exceeds slot budget of {} bytes",
                    len,
                    self.max_payload()
                ),
            });
        }
        // SAFETY: bounds checked against the slot budget above.
        let payload = unsafe { self.region.bytes(offset + LEN_PREFIX, len) };
        Value::from_bytes(payload)
    }

    fn wake_senders(&self) {
        // Rendezvous handoffs have both committing and handshaking senders
        // parked on the same side; wake them all.
        if self.region.capacity == 0 {
            self.region.senders.notify_all();
        } else {
            self.region.senders.notify_one();
        }
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.region.capacity)
            .field("slot_size", &self.region.slot_size)
            .field("status", &self.status())
            .finish()
    }
}
