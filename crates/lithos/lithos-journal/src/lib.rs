//! Journaled append/read over an asynchronous storage port.
//!
//! A [`Journal`] keeps the most recently appended bytes of a file in a
//! power-of-two ring buffer. Appends are copied into the ring and submitted
//! to the port without waiting; reads of recent bytes are answered from the
//! ring, older ones from the backend.
//!
//! ```no_run
//! use lithos_io::{FileStore, OpenMode};
//! use lithos_journal::{Journal, RingConfig, TagSequence};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FileStore::new());
//! let port = store.create_port();
//! let _worker = store.spawn_worker(Duration::from_micros(200))?;
//! let tags = TagSequence::new();
//!
//! let mut journal = Journal::open(
//!     Arc::clone(&store),
//!     "/tmp/lithos_journal",
//!     OpenMode::OpenOrCreate,
//!     port.id(),
//!     RingConfig::from_log2(16)?,
//!     &tags,
//! )?;
//! let at = journal.size();
//! journal.append(b"hello")?;
//!
//! let mut out = [0u8; 5];
//! journal.read(&mut out, at)?; // served from the ring
//!
//! journal.drain(&port, Duration::from_secs(1))?;
//! journal.close()?;
//! # Ok(())
//! # }
//! ```

mod error;
mod inflight;
mod journal;
mod ring;
mod tag;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{JournalError, ProtocolViolation};
pub use inflight::InflightQueue;
pub use journal::{Ack, CloseError, Journal, dispatch};
pub use ring::{MAX_RING_LOG2, RingConfig, offset_to_slot, split_at_wrap};
pub use tag::TagSequence;
