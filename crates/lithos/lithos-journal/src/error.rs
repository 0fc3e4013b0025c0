//! Error types for the journal.
//!
//! [`JournalError`] covers runtime failures of a journal handle. Structural
//! faults latch onto the handle (see [`JournalError::is_sticky`]) and are
//! returned by every later append/read until
//! [`Journal::clear_error`](crate::Journal::clear_error) is called.
//!
//! [`ProtocolViolation`] means the completion stream disagrees with what was
//! submitted. No retry repairs that; callers are expected to abort.

use lithos_io::IoError;
use std::path::PathBuf;

/// Errors returned by journal operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum JournalError {
    /// Close attempted while writes are still waiting for completion.
    #[error("work remaining: {inflight} writes in flight")]
    Pending { inflight: usize },

    /// Append would leave more unretired bytes than the ring can hold.
    #[error("buffer is full: {backlog} unretired bytes exceed capacity {capacity}")]
    BufferFull { backlog: u64, capacity: usize },

    /// Requested bytes extend past the current logical size.
    #[error("read out of range: {size} bytes at {offset}, logical size {logical_size}")]
    ReadOutOfRange {
        offset: u64,
        size: u64,
        logical_size: u64,
    },

    /// The backend failed to serve the part of a read older than the ring.
    #[error("read error: {size} bytes at {offset}")]
    Read {
        offset: u64,
        size: u64,
        #[source]
        source: IoError,
    },

    /// A submitted write completed with an error.
    #[error("write retiring cursor {cursor} failed")]
    WriteFailed {
        cursor: u32,
        #[source]
        source: IoError,
    },

    /// Backend close failed. Resources were released regardless.
    #[error("close error")]
    Close(#[source] IoError),

    /// Backend open failed; no handle was created.
    #[error("failed to open '{}'", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: IoError,
    },

    #[error("ring size log2 {0} outside [0, 30]")]
    InvalidRingSize(u32),

    /// A single append larger than the ring.
    #[error("append of {size} bytes exceeds ring capacity {capacity}")]
    TooLarge { size: usize, capacity: usize },

    /// Memory-only read reached bytes that are no longer buffered.
    #[error("offset {offset} not resident, ring window starts at {window_start}")]
    NotResident { offset: u64, window_start: u64 },
}

impl JournalError {
    /// Whether this error latches onto the handle when raised.
    pub fn is_sticky(&self) -> bool {
        matches!(
            self,
            JournalError::BufferFull { .. }
                | JournalError::ReadOutOfRange { .. }
                | JournalError::Read { .. }
                | JournalError::WriteFailed { .. }
        )
    }

    /// Stable numeric identifier, shared with [`IoError::code`].
    pub fn code(&self) -> i32 {
        match self {
            JournalError::Pending { .. } => -21006,
            JournalError::BufferFull { .. } => -21007,
            JournalError::ReadOutOfRange { .. } => -21005,
            JournalError::Read { .. } | JournalError::NotResident { .. } => -21004,
            JournalError::Open { source, .. } => source.code(),
            JournalError::WriteFailed { .. }
            | JournalError::Close(_)
            | JournalError::InvalidRingSize(_)
            | JournalError::TooLarge { .. } => -21000,
        }
    }
}

/// The completion stream contradicts the submission history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// No inflight write retires up to this cursor: the acknowledgment is
    /// unknown or its write was already retired.
    #[error("acknowledgment for cursor {cursor} matches no inflight write")]
    UnknownTarget { cursor: u32 },

    /// The write was already acknowledged and is waiting on a predecessor.
    #[error("acknowledgment for cursor {cursor} delivered twice")]
    DoubleAck { cursor: u32 },
}
