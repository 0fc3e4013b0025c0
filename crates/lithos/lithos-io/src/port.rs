//! Port vocabulary shared by every storage backend.

use crate::error::IoError;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// How a backing file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Existing file, reads only. Writes submitted to it complete with an error.
    ReadOnly,
    /// Existing file, read-write.
    Open,
    /// Read-write, created if missing.
    OpenOrCreate,
    /// Read-write, must not exist yet.
    Create,
}

/// Opaque handle to a file owned by a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// Identifies the completion channel a submission reports back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Caller-chosen token returned unchanged with a completion.
///
/// The journal stores its routing tag and the write cursor the submission
/// will retire up to. Packs into a single `u64` with the tag in the low half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Echo {
    pub tag: u32,
    pub cursor: u32,
}

impl Echo {
    #[inline]
    pub fn as_u64(self) -> u64 {
        (self.tag as u64) | ((self.cursor as u64) << 32)
    }

    #[inline]
    pub fn from_u64(raw: u64) -> Self {
        Self {
            tag: raw as u32,
            cursor: (raw >> 32) as u32,
        }
    }
}

/// Notification that a submitted write finished, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub echo: Echo,
    pub status: Result<(), IoError>,
}

/// Asynchronous storage backend consumed by the journal.
///
/// Implementations are shared between the owner of a journal and whatever
/// executes the submitted writes, hence `Send + Sync` and `&self` receivers.
pub trait StoragePort: Send + Sync {
    /// Opens `path`, returning the file handle and its current size in bytes.
    fn open(&self, path: &Path, mode: OpenMode) -> Result<(FileId, u64), IoError>;

    /// Releases `file`. Fails with [`IoError::Pending`] while writes for it
    /// are still queued.
    fn close(&self, file: FileId) -> Result<(), IoError>;

    /// Queues a positional write of `bytes` at `offset`. Never blocks; the
    /// outcome arrives later as a [`Completion`] on `port` carrying `echo`.
    fn submit_write(&self, port: PortId, echo: Echo, file: FileId, bytes: Box<[u8]>, offset: u64);

    /// Fills `dest` from `offset`, blocking until done.
    fn read(&self, file: FileId, dest: &mut [u8], offset: u64) -> Result<(), IoError>;
}

/// Receiving end of a port's completion channel.
///
/// Completions are produced on whatever thread runs the backend and consumed
/// here by the owner of the journals submitting on this port.
pub struct CompletionPort {
    id: PortId,
    rx: Receiver<Completion>,
}

impl CompletionPort {
    pub(crate) fn new(id: PortId, rx: Receiver<Completion>) -> Self {
        Self { id, rx }
    }

    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Returns the next completion if one is ready.
    pub fn poll(&self) -> Option<Completion> {
        match self.rx.try_recv() {
            Ok(c) => Some(c),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Waits up to `timeout` for the next completion.
    pub fn wait(&self, timeout: Duration) -> Option<Completion> {
        match self.rx.recv_timeout(timeout) {
            Ok(c) => Some(c),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl fmt::Debug for CompletionPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionPort").field("id", &self.id).finish()
    }
}
