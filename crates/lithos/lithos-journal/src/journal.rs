//! The journal handle: buffered asynchronous appends with merged reads.
//!
//! # Design
//! - **Append**: bytes are copied into the ring and submitted to the storage
//!   port as one write, or two when the span crosses the end of the ring.
//!   The call returns before anything is durable.
//! - **Completion**: the port later reports each write; [`InflightQueue`]
//!   turns those reports, in whatever order they arrive, into an in-order
//!   advance of the retire cursor.
//! - **Read**: the trailing `capacity` bytes appended since open are served
//!   from the ring; anything older (or from before open) is read from the
//!   backend. A range straddling the two is stitched together.
//!
//! # Cursors
//! `write_cursor` and `retire_cursor` count bytes appended since open as
//! wrapping `u32`s. At most `capacity ≤ 2^30` bytes are ever unretired, so
//! their wrapping difference is always exact. The logical file size is
//! tracked separately as a `u64`.
//!
//! # Ownership
//! A handle is owned by one execution context. Completions produced by the
//! port's worker thread reach it as messages on a
//! [`CompletionPort`], which the owner drains with [`Journal::pump`],
//! [`Journal::drain`] or [`dispatch`].

use crate::error::{JournalError, ProtocolViolation};
use crate::inflight::InflightQueue;
use crate::ring::{RingConfig, RingStore};
use crate::tag::TagSequence;
use lithos_io::{Completion, CompletionPort, Echo, FileId, IoError, OpenMode, PortId, StoragePort};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Outcome of offering a completion to a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The completion belonged to this handle and was reconciled.
    Handled,
    /// The routing tag belongs to another handle; nothing changed.
    NotMine,
}

/// A journaled file: append at the end, read anywhere.
pub struct Journal<P: StoragePort> {
    port: Arc<P>,
    file: FileId,
    path: PathBuf,
    port_id: PortId,
    tag: u32,
    /// Latched fault, returned by append/read until cleared.
    error: Option<JournalError>,
    /// Includes bytes appended but not yet durable.
    logical_size: u64,
    size_at_open: u64,
    write_cursor: u32,
    ring: RingStore,
    inflight: InflightQueue,
    closed: bool,
}

impl<P: StoragePort> Journal<P> {
    /// Opens `path` through `port`, submitting writes on `port_id`.
    ///
    /// # Errors
    /// [`JournalError::Open`] if the backend cannot open the file; no handle
    /// is created and no tag is consumed.
    pub fn open(
        port: Arc<P>,
        path: impl AsRef<Path>,
        mode: OpenMode,
        port_id: PortId,
        ring: RingConfig,
        tags: &TagSequence,
    ) -> Result<Self, JournalError> {
        let path = path.as_ref();
        let (file, size) = port.open(path, mode).map_err(|source| JournalError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let tag = tags.next_tag();
        debug!(
            tag,
            %file,
            %port_id,
            path = %path.display(),
            size,
            capacity = ring.capacity(),
            "journal opened"
        );

        Ok(Self {
            port,
            file,
            path: path.to_path_buf(),
            port_id,
            tag,
            error: None,
            logical_size: size,
            size_at_open: size,
            write_cursor: 0,
            ring: RingStore::new(ring),
            inflight: InflightQueue::new(),
            closed: false,
        })
    }

    /// Current logical size, including bytes not yet durable.
    #[inline]
    pub fn size(&self) -> u64 {
        self.logical_size
    }

    #[inline]
    pub fn size_at_open(&self) -> u64 {
        self.size_at_open
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn tag(&self) -> u32 {
        self.tag
    }

    #[inline]
    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    #[inline]
    pub fn ring(&self) -> RingConfig {
        self.ring.config()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[inline]
    pub fn write_cursor(&self) -> u32 {
        self.write_cursor
    }

    #[inline]
    pub fn retire_cursor(&self) -> u32 {
        self.inflight.retire_cursor()
    }

    /// Number of submitted writes not yet retired.
    #[inline]
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    /// Bytes appended but not yet retired.
    #[inline]
    pub fn backlog(&self) -> u64 {
        self.write_cursor.wrapping_sub(self.retire_cursor()) as u64
    }

    /// Whether appending `len` bytes now would fit beside the backlog.
    #[inline]
    pub fn has_room(&self, len: usize) -> bool {
        self.backlog() + len as u64 <= self.ring.capacity() as u64
    }

    pub fn error(&self) -> Option<&JournalError> {
        self.error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Absolute offset of the oldest byte still served from the ring.
    #[inline]
    pub fn window_start(&self) -> u64 {
        let trailing = self.logical_size.saturating_sub(self.ring.capacity() as u64);
        self.size_at_open.max(trailing)
    }

    #[cold]
    fn latch(&mut self, err: JournalError) -> JournalError {
        warn!(tag = self.tag, path = %self.path.display(), "journal fault latched: {err}");
        self.error = Some(err.clone());
        err
    }

    /// Appends `bytes` at the end of the file without waiting for durability.
    ///
    /// # Errors
    /// - the latched error, if one is set (nothing happens)
    /// - [`JournalError::TooLarge`] if `bytes` exceeds the ring capacity
    /// - [`JournalError::BufferFull`] (latched) if the unretired backlog plus
    ///   `bytes` would exceed the ring capacity
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), JournalError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let capacity = self.ring.capacity();
        if bytes.len() > capacity {
            return Err(JournalError::TooLarge {
                size: bytes.len(),
                capacity,
            });
        }

        let size = bytes.len() as u32;
        let new_write = self.write_cursor.wrapping_add(size);
        let backlog = new_write.wrapping_sub(self.retire_cursor()) as u64;
        if backlog > capacity as u64 {
            return Err(self.latch(JournalError::BufferFull { backlog, capacity }));
        }

        let relative = self.logical_size - self.size_at_open;
        let (head, tail) = self.ring.copy_in(relative, bytes);
        let offset = self.logical_size;
        if tail == 0 {
            self.submit(bytes, offset, new_write);
        } else {
            let boundary = self.write_cursor.wrapping_add(head as u32);
            trace!(tag = self.tag, head, tail, "append wraps ring");
            self.submit(&bytes[..head], offset, boundary);
            self.submit(&bytes[head..], offset + head as u64, new_write);
        }

        self.logical_size += bytes.len() as u64;
        self.write_cursor = new_write;
        Ok(())
    }

    fn submit(&mut self, bytes: &[u8], offset: u64, target: u32) {
        self.inflight.enqueue(target);
        let echo = Echo {
            tag: self.tag,
            cursor: target,
        };
        self.port
            .submit_write(self.port_id, echo, self.file, bytes.into(), offset);
    }

    /// Fills `dest` with the bytes at absolute `offset`.
    ///
    /// Bytes inside the ring window are copied from memory, so data appended
    /// a moment ago is visible before its write completes. Older bytes are
    /// read from the backend, blocking the caller.
    ///
    /// # Errors
    /// - the latched error, if one is set
    /// - [`JournalError::ReadOutOfRange`] (latched) if the range ends past
    ///   [`size`](Self::size)
    /// - [`JournalError::Read`] (latched) if the backend read fails
    pub fn read(&mut self, dest: &mut [u8], offset: u64) -> Result<(), JournalError> {
        self.read_range(dest, offset, false)
    }

    /// Like [`read`](Self::read) but never touches the backend.
    ///
    /// # Errors
    /// As `read`, plus [`JournalError::NotResident`] (not latched) if part of
    /// the range lies before [`window_start`](Self::window_start).
    pub fn read_resident(&mut self, dest: &mut [u8], offset: u64) -> Result<(), JournalError> {
        self.read_range(dest, offset, true)
    }

    fn read_range(
        &mut self,
        dest: &mut [u8],
        offset: u64,
        resident_only: bool,
    ) -> Result<(), JournalError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let size = dest.len() as u64;
        if offset
            .checked_add(size)
            .is_none_or(|end| end > self.logical_size)
        {
            let logical_size = self.logical_size;
            return Err(self.latch(JournalError::ReadOutOfRange {
                offset,
                size,
                logical_size,
            }));
        }
        if size == 0 {
            return Ok(());
        }

        let window_start = self.window_start();
        let cold_len = window_start.saturating_sub(offset).min(size);
        if cold_len > 0 && resident_only {
            return Err(JournalError::NotResident {
                offset,
                window_start,
            });
        }

        let (cold, hot) = dest.split_at_mut(cold_len as usize);
        if !cold.is_empty()
            && let Err(source) = self.port.read(self.file, cold, offset)
        {
            return Err(self.latch(JournalError::Read {
                offset,
                size: cold_len,
                source,
            }));
        }
        if !hot.is_empty() {
            let relative = offset + cold_len - self.size_at_open;
            self.ring.copy_out(relative, hot);
        }
        Ok(())
    }

    /// Reconciles a completion echo.
    ///
    /// # Errors
    /// A [`ProtocolViolation`] if the echo carries this handle's tag but
    /// matches no outstanding write. The handle's bookkeeping no longer
    /// describes the backend at that point; callers should abort.
    pub fn ack(&mut self, echo: Echo) -> Result<Ack, ProtocolViolation> {
        if echo.tag != self.tag {
            return Ok(Ack::NotMine);
        }
        self.inflight.complete(echo.cursor)?;
        Ok(Ack::Handled)
    }

    /// [`ack`](Self::ack) plus status handling: a failed write still retires
    /// but latches [`JournalError::WriteFailed`].
    pub fn complete(&mut self, completion: &Completion) -> Result<Ack, ProtocolViolation> {
        let ack = self.ack(completion.echo)?;
        if ack == Ack::Handled
            && let Err(source) = &completion.status
        {
            self.latch(JournalError::WriteFailed {
                cursor: completion.echo.cursor,
                source: source.clone(),
            });
        }
        Ok(ack)
    }

    /// Applies every completion currently waiting on `port`.
    ///
    /// Completions for other handles are returned untouched, in arrival order.
    pub fn pump(&mut self, port: &CompletionPort) -> Result<Vec<Completion>, ProtocolViolation> {
        let mut foreign = Vec::new();
        while let Some(completion) = port.poll() {
            if self.complete(&completion)? == Ack::NotMine {
                foreign.push(completion);
            }
        }
        Ok(foreign)
    }

    /// Waits up to `timeout` for every inflight write to retire.
    ///
    /// Intended for a port used by this handle alone: completions for other
    /// tags are logged and discarded. Returns whether the queue drained.
    pub fn drain(&mut self, port: &CompletionPort, timeout: Duration) -> Result<bool, ProtocolViolation> {
        let deadline = Instant::now() + timeout;
        while !self.inflight.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(completion) = port.wait(remaining) else {
                return Ok(false);
            };
            if self.complete(&completion)? == Ack::NotMine {
                warn!(
                    tag = self.tag,
                    foreign = completion.echo.tag,
                    "discarding completion for another journal"
                );
            }
        }
        Ok(true)
    }

    /// Closes the backend file and releases the handle.
    ///
    /// # Errors
    /// - [`CloseError::Pending`] while writes are unretired; the handle is
    ///   returned intact so the caller can retry after more completions.
    /// - [`CloseError::Backend`] if the backend reported a close failure.
    ///   The handle is released anyway.
    pub fn close(mut self) -> Result<(), CloseError<P>> {
        if self.retire_cursor() != self.write_cursor {
            return Err(CloseError::Pending(Box::new(self)));
        }
        let result = self.port.close(self.file);
        self.closed = true;
        match result {
            Ok(()) => {
                debug!(tag = self.tag, path = %self.path.display(), size = self.logical_size, "journal closed");
                Ok(())
            }
            Err(err) => {
                warn!(tag = self.tag, path = %self.path.display(), "close error: {err}");
                Err(CloseError::Backend(err))
            }
        }
    }
}

impl<P: StoragePort> Drop for Journal<P> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if !self.inflight.is_empty() {
            warn!(
                tag = self.tag,
                path = %self.path.display(),
                inflight = self.inflight.len(),
                "journal dropped with writes in flight"
            );
        }
        if let Err(err) = self.port.close(self.file) {
            warn!(tag = self.tag, path = %self.path.display(), "close on drop failed: {err}");
        }
    }
}

impl<P: StoragePort> fmt::Debug for Journal<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("file", &self.file)
            .field("port_id", &self.port_id)
            .field("tag", &self.tag)
            .field("error", &self.error)
            .field("logical_size", &self.logical_size)
            .field("size_at_open", &self.size_at_open)
            .field("write_cursor", &self.write_cursor)
            .field("retire_cursor", &self.retire_cursor())
            .field("capacity", &self.ring.capacity())
            .finish()
    }
}

/// Failure of [`Journal::close`].
#[derive(thiserror::Error)]
pub enum CloseError<P: StoragePort> {
    #[error("work remaining: writes still in flight")]
    Pending(Box<Journal<P>>),

    #[error("close error")]
    Backend(#[source] IoError),
}

impl<P: StoragePort> CloseError<P> {
    /// Recovers the still-open handle of a [`CloseError::Pending`].
    pub fn into_journal(self) -> Option<Journal<P>> {
        match self {
            CloseError::Pending(journal) => Some(*journal),
            CloseError::Backend(_) => None,
        }
    }

    pub fn to_journal_error(&self) -> JournalError {
        match self {
            CloseError::Pending(journal) => JournalError::Pending {
                inflight: journal.inflight_len(),
            },
            CloseError::Backend(err) => JournalError::Close(err.clone()),
        }
    }
}

impl<P: StoragePort> fmt::Debug for CloseError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseError::Pending(journal) => f.debug_tuple("Pending").field(journal).finish(),
            CloseError::Backend(err) => f.debug_tuple("Backend").field(err).finish(),
        }
    }
}

/// Routes one completion to whichever of `journals` owns its tag.
///
/// Returns `false` if none did.
pub fn dispatch<P: StoragePort>(
    journals: &mut [Journal<P>],
    completion: &Completion,
) -> Result<bool, ProtocolViolation> {
    for journal in journals.iter_mut() {
        if journal.complete(completion)? == Ack::Handled {
            return Ok(true);
        }
    }
    Ok(false)
}
