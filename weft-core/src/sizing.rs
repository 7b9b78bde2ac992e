//! Slot-budget estimation.
//!
//! Channel slots are fixed-size; callers creating a channel need a per-slot
//! byte budget that fits their payloads. The mapping here is deterministic
//! for a given sample so the two endpoints of a channel can derive the same
//! geometry independently.

use crate::channel::MIN_SLOT_SIZE;
use crate::error::Result;
use crate::value::Value;

/// Bytes reserved for the slot length prefix.
const PREFIX: usize = 4;

/// Headroom added over the sample encoding, as a fraction denominator
/// (sample length / 4 == 25%).
const HEADROOM_DIV: usize = 4;

/// Compute a slot budget from a sample payload.
///
/// The budget covers the sample's encoded form plus 25% headroom and the
/// length prefix, rounded up to the next power of two and floored at the
/// minimum slot size.
///
/// # Errors
///
/// `Serialization` if the sample cannot be encoded.
pub fn slot_budget(sample: &Value) -> Result<u32> {
    let encoded = sample.to_bytes()?;
    Ok(slot_budget_for_max(encoded.len()))
}

/// Compute a slot budget for a known maximum payload length.
#[must_use]
pub fn slot_budget_for_max(payload_len: usize) -> u32 {
    let padded = payload_len + payload_len / HEADROOM_DIV + PREFIX;
    let budget = padded
        .checked_next_power_of_two()
        .unwrap_or(usize::MAX)
        .min(u32::MAX as usize);
    (budget as u32).max(MIN_SLOT_SIZE)
}
