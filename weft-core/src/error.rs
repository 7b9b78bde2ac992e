//! Error types for WEFT.
//!
//! One error enum covers both the channel data plane and the worker pool so
//! that task results can carry any failure across the pool boundary. Every
//! variant has a stable code in its display string.

use crate::types::WorkerId;
use thiserror::Error;

/// The main error type for WEFT operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WeftError {
    // =========================================================================
    // Region Errors (E001-E099)
    // =========================================================================
    /// Failed to allocate or map the shared channel region.
    #[error("E001: failed to create channel region: {cause}")]
    RegionCreate {
        /// Reason for the failure.
        cause: String,
    },

    /// Channel geometry is invalid (slot budget too small, size overflow).
    #[error("E002: invalid channel layout: {cause}")]
    RegionLayout {
        /// Description of the layout problem.
        cause: String,
    },

    // =========================================================================
    // Channel Errors (E101-E199)
    // =========================================================================
    /// Send attempted on a closed channel.
    #[error("E101: send on closed channel")]
    Closed,

    /// Receive attempted on a closed channel with no buffered values left.
    #[error("E102: receive on closed and drained channel")]
    ClosedAndEmpty,

    /// Serialised payload does not fit the channel's slot budget.
    #[error("E103: payload of {len} bytes exceeds slot budget of {max} bytes")]
    PayloadTooLarge {
        /// Serialised payload length.
        len: usize,
        /// Maximum payload bytes a slot can hold.
        max: usize,
    },

    /// Payload could not be encoded.
    #[error("E104: failed to encode payload: {cause}")]
    Serialization {
        /// Underlying encoder error.
        cause: String,
    },

    /// Payload bytes could not be decoded.
    #[error("E105: failed to decode payload: {cause}")]
    Deserialization {
        /// Underlying decoder error.
        cause: String,
    },

    // =========================================================================
    // Pool Errors (E201-E299)
    // =========================================================================
    /// No task function registered under the submitted name.
    #[error("E201: no task registered under '{name}'")]
    TaskNotFound {
        /// The unknown task name.
        name: String,
    },

    /// A worker exited abnormally while a task was assigned to it.
    #[error("E202: {worker_id} failed: {cause}")]
    WorkerFailure {
        /// The worker that failed.
        worker_id: WorkerId,
        /// Reason for the failure.
        cause: String,
    },

    /// Pending task discarded by pool teardown.
    #[error("E203: task cancelled by pool shutdown")]
    Shutdown,

    /// The pool's pending queue is at capacity.
    #[error("E204: pending queue full: {current}/{max} tasks")]
    QueueFull {
        /// Current queue length.
        current: usize,
        /// Maximum queue length.
        max: usize,
    },

    /// A task function returned an error or panicked.
    #[error("E205: task execution failed: {cause}")]
    TaskFailed {
        /// Worker-reported failure message.
        cause: String,
    },
}

impl WeftError {
    /// Get the error code (e.g., "E101").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::RegionCreate { .. } => "E001",
            Self::RegionLayout { .. } => "E002",
            Self::Closed => "E101",
            Self::ClosedAndEmpty => "E102",
            Self::PayloadTooLarge { .. } => "E103",
            Self::Serialization { .. } => "E104",
            Self::Deserialization { .. } => "E105",
            Self::TaskNotFound { .. } => "E201",
            Self::WorkerFailure { .. } => "E202",
            Self::Shutdown => "E203",
            Self::QueueFull { .. } => "E204",
            Self::TaskFailed { .. } => "E205",
        }
    }

    /// Check if this error reports the channel-closed condition.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed | Self::ClosedAndEmpty)
    }

    /// Check if the operation may succeed if retried later.
    ///
    /// Closed channels and layout errors are terminal; a full queue or a
    /// failed worker may clear up.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::QueueFull { .. } | Self::WorkerFailure { .. })
    }
}

/// Result type alias using `WeftError`.
pub type Result<T> = std::result::Result<T, WeftError>;
