//! Asynchronous storage port used by the journal.
//!
//! The port separates *submitting* a write from *learning* that it finished:
//! callers hand over bytes with [`StoragePort::submit_write`] and later receive
//! a [`Completion`] carrying the [`Echo`] they attached. Reads are synchronous.
//!
//! [`FileStore`] is the `std::fs` implementation. Its submissions are executed
//! by [`FileStore::tick`], either called directly or from a background
//! [`Worker`], and completions are delivered over a per-port channel
//! ([`CompletionPort`]).

mod error;
mod file_store;
mod port;

pub use error::IoError;
pub use file_store::{FileStore, Worker};
pub use port::{Completion, CompletionPort, Echo, FileId, OpenMode, PortId, StoragePort};
