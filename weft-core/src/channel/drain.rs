//! Lazy ordered traversal over a channel.

use super::ring::Channel;
use crate::error::{Result, WeftError};
use crate::value::Value;

/// Iterator yielding successive received values until the channel has been
/// closed and its buffer drained.
///
/// Each `next` call blocks like [`Channel::receive`]. Decode failures are
/// yielded as `Err` items and do not end the iteration (the failing slot is
/// not consumed). Dropping the iterator mid-traversal leaves the channel
/// otherwise unchanged; a later traversal resumes where this one stopped.
pub struct Drain<'a> {
    channel: &'a Channel,
}

impl<'a> Drain<'a> {
    pub(crate) fn new(channel: &'a Channel) -> Self {
        Self { channel }
    }
}

impl Iterator for Drain<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.channel.receive() {
            Ok(value) => Some(Ok(value)),
            Err(WeftError::ClosedAndEmpty) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
