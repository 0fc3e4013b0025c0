//! Shared fixtures for the journal benchmarks.

use lithos_io::{CompletionPort, FileStore, OpenMode};
use lithos_journal::{Journal, RingConfig, TagSequence};
use std::sync::Arc;

pub fn temp_journal_path(label: &str) -> String {
    let pid = std::process::id();
    format!("/tmp/lithos_bench_{label}_{pid}")
}

/// Deterministic payload so reads can be spot-checked.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

/// A fresh journal over its own store and completion port.
///
/// No worker is spawned: benchmarks call [`settle`] to execute and retire
/// writes at the points they choose.
pub struct Bench {
    pub store: Arc<FileStore>,
    pub port: CompletionPort,
    pub journal: Journal<FileStore>,
    pub path: String,
}

impl Bench {
    pub fn create(label: &str, ring_log2: u32) -> Self {
        let path = temp_journal_path(label);
        let _ = std::fs::remove_file(&path);
        let store = Arc::new(FileStore::new());
        let port = store.create_port();
        let journal = Journal::open(
            Arc::clone(&store),
            &path,
            OpenMode::Create,
            port.id(),
            RingConfig::from_log2(ring_log2).expect("valid ring size"),
            &TagSequence::new(),
        )
        .expect("failed to open journal");
        Self {
            store,
            port,
            journal,
            path,
        }
    }

    /// Executes every queued write and retires it.
    pub fn settle(&mut self) {
        self.store.tick();
        let foreign = self.journal.pump(&self.port).expect("consistent completions");
        assert!(foreign.is_empty());
    }

    /// Appends `len`-byte records until `total` bytes have been written.
    pub fn fill(&mut self, total: usize, len: usize) {
        let record = payload(len);
        let mut written = 0;
        while written < total {
            if !self.journal.has_room(len) {
                self.settle();
            }
            self.journal.append(&record).expect("append");
            written += len;
        }
        self.settle();
    }

    pub fn finish(mut self) {
        self.settle();
        let path = self.path.clone();
        drop(self);
        let _ = std::fs::remove_file(path);
    }
}
