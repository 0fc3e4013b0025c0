//! `std::fs` backed storage port.
//!
//! Submitted writes are queued per file and executed by [`FileStore::tick`].
//! Each executed write produces one [`Completion`] on the port it was
//! submitted on. A background [`Worker`] can drive `tick` so completions
//! arrive asynchronously with respect to the submitting thread.

use crate::error::IoError;
use crate::port::{Completion, CompletionPort, Echo, FileId, OpenMode, PortId, StoragePort};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

struct Submission {
    port: PortId,
    echo: Echo,
    bytes: Box<[u8]>,
    offset: u64,
}

struct OpenFile {
    file: Arc<File>,
    path: PathBuf,
    writable: bool,
    /// Writes waiting for the next `tick`.
    queued: VecDeque<Submission>,
    /// Writes taken by a running `tick` whose completion is not sent yet.
    executing: usize,
}

#[derive(Default)]
struct State {
    file_seq: u32,
    port_seq: u32,
    files: HashMap<FileId, OpenFile>,
    ports: HashMap<PortId, Sender<Completion>>,
}

/// A storage port over regular files.
#[derive(Default)]
pub struct FileStore {
    state: Mutex<State>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // State stays consistent across a panicking holder: every mutation is
        // a single insert/remove/push.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocates a new completion channel.
    pub fn create_port(&self) -> CompletionPort {
        let (tx, rx) = mpsc::channel();
        let mut st = self.lock();
        st.port_seq += 1;
        let id = PortId(st.port_seq);
        st.ports.insert(id, tx);
        CompletionPort::new(id, rx)
    }

    /// Number of writes queued or executing across all files.
    pub fn pending(&self) -> usize {
        self.lock()
            .files
            .values()
            .map(|f| f.queued.len() + f.executing)
            .sum()
    }

    /// Executes every queued write and delivers its completion.
    ///
    /// Returns the number of writes performed.
    pub fn tick(&self) -> usize {
        let batch: Vec<(FileId, Arc<File>, Submission)> = {
            let mut st = self.lock();
            let mut batch = Vec::new();
            for (id, open) in st.files.iter_mut() {
                let file = Arc::clone(&open.file);
                open.executing += open.queued.len();
                batch.extend(open.queued.drain(..).map(|s| (*id, Arc::clone(&file), s)));
            }
            batch
        };

        if batch.is_empty() {
            return 0;
        }

        let done: Vec<(FileId, PortId, Completion)> = batch
            .into_iter()
            .map(|(id, handle, sub)| {
                let status = handle.write_all_at(&sub.bytes, sub.offset).map_err(|e| {
                    error!(file = %id, offset = sub.offset, len = sub.bytes.len(), "write failed: {e}");
                    IoError::from(e)
                });
                let completion = Completion {
                    echo: sub.echo,
                    status,
                };
                (id, sub.port, completion)
            })
            .collect();

        let performed = done.len();
        let mut st = self.lock();
        for (id, port, completion) in done {
            if let Some(open) = st.files.get_mut(&id) {
                open.executing -= 1;
            }
            deliver(&st.ports, port, completion);
        }
        performed
    }

    /// Runs [`tick`](Self::tick) on a background thread, sleeping `idle`
    /// whenever there was nothing to do.
    pub fn spawn_worker(self: &Arc<Self>, idle: Duration) -> std::io::Result<Worker> {
        let store = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("lithos-io".into())
            .spawn(move || {
                while !flag.load(Ordering::Acquire) {
                    if store.tick() == 0 {
                        thread::sleep(idle);
                    }
                }
                // Flush whatever was submitted before the stop request.
                while store.tick() > 0 {}
            })?;
        Ok(Worker {
            stop,
            handle: Some(handle),
        })
    }
}

fn deliver(ports: &HashMap<PortId, Sender<Completion>>, port: PortId, completion: Completion) {
    match ports.get(&port) {
        Some(tx) => {
            if tx.send(completion).is_err() {
                warn!(%port, "completion dropped, port receiver is gone");
            }
        }
        None => warn!(%port, "completion dropped, unknown port"),
    }
}

impl StoragePort for FileStore {
    fn open(&self, path: &Path, mode: OpenMode) -> Result<(FileId, u64), IoError> {
        let mut opts = OpenOptions::new();
        opts.read(true);
        match mode {
            OpenMode::ReadOnly => {}
            OpenMode::Open => {
                opts.write(true);
            }
            OpenMode::OpenOrCreate => {
                opts.write(true).create(true);
            }
            OpenMode::Create => {
                opts.write(true).create_new(true);
            }
        }
        let file = opts.open(path)?;
        let size = file.metadata()?.len();

        let mut st = self.lock();
        st.file_seq += 1;
        let id = FileId(st.file_seq);
        st.files.insert(
            id,
            OpenFile {
                file: Arc::new(file),
                path: path.to_path_buf(),
                writable: mode != OpenMode::ReadOnly,
                queued: VecDeque::new(),
                executing: 0,
            },
        );
        debug!(file = %id, path = %path.display(), size, ?mode, "opened");
        Ok((id, size))
    }

    fn close(&self, file: FileId) -> Result<(), IoError> {
        let open = {
            let mut st = self.lock();
            let open = st.files.get(&file).ok_or(IoError::UnknownFile(file))?;
            if !open.queued.is_empty() || open.executing > 0 {
                return Err(IoError::Pending);
            }
            st.files.remove(&file).ok_or(IoError::UnknownFile(file))?
        };
        debug!(%file, path = %open.path.display(), "closing");
        if open.writable {
            open.file.sync_data()?;
        }
        Ok(())
    }

    fn submit_write(&self, port: PortId, echo: Echo, file: FileId, bytes: Box<[u8]>, offset: u64) {
        let mut st = self.lock();
        let rejected = match st.files.get_mut(&file) {
            Some(open) if open.writable => {
                open.queued.push_back(Submission {
                    port,
                    echo,
                    bytes,
                    offset,
                });
                return;
            }
            Some(_) => IoError::NotPermitted,
            None => IoError::UnknownFile(file),
        };
        warn!(%file, %port, "write rejected: {rejected}");
        deliver(
            &st.ports,
            port,
            Completion {
                echo,
                status: Err(rejected),
            },
        );
    }

    fn read(&self, file: FileId, dest: &mut [u8], offset: u64) -> Result<(), IoError> {
        let handle = {
            let st = self.lock();
            st.files
                .get(&file)
                .map(|f| Arc::clone(&f.file))
                .ok_or(IoError::UnknownFile(file))?
        };
        handle.read_exact_at(dest, offset).map_err(IoError::read)
    }
}

/// Background driver for a [`FileStore`]. Stops and joins on drop.
pub struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Requests the worker to finish outstanding writes and exit, then waits.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("lithos-io worker panicked");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[test]
    fn writes_complete_only_after_tick() {
        let dir = scratch();
        let store = FileStore::new();
        let port = store.create_port();
        let (file, size) = store
            .open(&dir.path().join("a"), OpenMode::Create)
            .expect("open");
        assert_eq!(size, 0);

        let echo = Echo { tag: 1, cursor: 5 };
        store.submit_write(port.id(), echo, file, b"hello".to_vec().into_boxed_slice(), 0);
        assert!(port.poll().is_none());
        assert_eq!(store.pending(), 1);

        assert_eq!(store.tick(), 1);
        let completion = port.poll().expect("completion");
        assert_eq!(completion.echo, echo);
        assert_eq!(completion.status, Ok(()));
        assert_eq!(store.pending(), 0);

        let mut out = [0u8; 5];
        store.read(file, &mut out, 0).expect("read");
        assert_eq!(&out, b"hello");
        store.close(file).expect("close");
    }

    #[test]
    fn close_with_queued_writes_is_pending() {
        let dir = scratch();
        let store = FileStore::new();
        let port = store.create_port();
        let (file, _) = store
            .open(&dir.path().join("b"), OpenMode::OpenOrCreate)
            .expect("open");
        store.submit_write(port.id(), Echo { tag: 1, cursor: 1 }, file, Box::new([1u8]), 0);

        assert_eq!(store.close(file), Err(IoError::Pending));
        store.tick();
        assert!(port.poll().is_some());
        assert_eq!(store.close(file), Ok(()));
        assert_eq!(store.close(file), Err(IoError::UnknownFile(file)));
    }

    #[test]
    fn open_modes_map_errors() {
        let dir = scratch();
        let store = FileStore::new();
        let path = dir.path().join("c");

        assert_eq!(store.open(&path, OpenMode::Open), Err(IoError::NotFound));
        assert_eq!(store.open(&path, OpenMode::ReadOnly), Err(IoError::NotFound));

        let (file, _) = store.open(&path, OpenMode::Create).expect("create");
        assert_eq!(store.open(&path, OpenMode::Create), Err(IoError::AlreadyExists));
        store.close(file).expect("close");

        let (file, _) = store.open(&path, OpenMode::Open).expect("reopen");
        store.close(file).expect("close");
    }

    #[test]
    fn read_only_file_rejects_writes_through_completion() {
        let dir = scratch();
        let path = dir.path().join("d");
        std::fs::write(&path, b"abc").expect("seed");

        let store = FileStore::new();
        let port = store.create_port();
        let (file, size) = store.open(&path, OpenMode::ReadOnly).expect("open");
        assert_eq!(size, 3);

        let echo = Echo { tag: 9, cursor: 1 };
        store.submit_write(port.id(), echo, file, Box::new([b'x']), 3);
        let completion = port.poll().expect("rejection is immediate");
        assert_eq!(completion.echo, echo);
        assert_eq!(completion.status, Err(IoError::NotPermitted));
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn short_read_is_a_read_error() {
        let dir = scratch();
        let store = FileStore::new();
        let (file, _) = store
            .open(&dir.path().join("e"), OpenMode::Create)
            .expect("open");
        let mut out = [0u8; 4];
        let err = store.read(file, &mut out, 0).expect_err("empty file");
        assert_eq!(err.code(), -21004);
    }

    #[test]
    fn worker_drives_completions() {
        let dir = scratch();
        let store = Arc::new(FileStore::new());
        let port = store.create_port();
        let worker = store
            .spawn_worker(Duration::from_micros(50))
            .expect("spawn worker");
        let (file, _) = store
            .open(&dir.path().join("f"), OpenMode::Create)
            .expect("open");

        for i in 0..8u32 {
            let bytes = vec![i as u8; 4].into_boxed_slice();
            store.submit_write(port.id(), Echo { tag: 3, cursor: (i + 1) * 4 }, file, bytes, i as u64 * 4);
        }

        let mut seen = 0;
        while seen < 8 {
            let c = port.wait(Duration::from_secs(5)).expect("completion in time");
            assert_eq!(c.echo.tag, 3);
            seen += 1;
        }
        worker.stop();

        let mut out = [0u8; 32];
        store.read(file, &mut out, 0).expect("read");
        for i in 0..8usize {
            assert_eq!(&out[i * 4..i * 4 + 4], &[i as u8; 4]);
        }
    }
}
