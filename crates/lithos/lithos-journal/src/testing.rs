//! In-memory storage port that hands submissions to the test to complete.

use lithos_io::{Completion, Echo, FileId, IoError, OpenMode, PortId, StoragePort};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub(crate) struct Submitted {
    pub port: PortId,
    pub echo: Echo,
    pub file: FileId,
    pub bytes: Box<[u8]>,
    pub offset: u64,
}

#[derive(Default)]
struct Script {
    file_seq: u32,
    /// Durable contents: only completed writes land here.
    files: HashMap<FileId, Vec<u8>>,
    seed: Vec<u8>,
    submitted: Vec<Submitted>,
    fail_open: Option<IoError>,
    fail_reads: bool,
    fail_close: bool,
    closed: Vec<FileId>,
    reads: usize,
}

#[derive(Default)]
pub(crate) struct ScriptedPort {
    script: Mutex<Script>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of every file opened from now on.
    pub fn with_seed(seed: &[u8]) -> Self {
        let port = Self::new();
        port.script.lock().unwrap().seed = seed.to_vec();
        port
    }

    pub fn fail_open(&self, err: IoError) {
        self.script.lock().unwrap().fail_open = Some(err);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.script.lock().unwrap().fail_reads = fail;
    }

    pub fn fail_close(&self, fail: bool) {
        self.script.lock().unwrap().fail_close = fail;
    }

    /// Takes every submission made since the last call, in submission order.
    pub fn take(&self) -> Vec<Submitted> {
        std::mem::take(&mut self.script.lock().unwrap().submitted)
    }

    /// Makes a submission durable and returns its completion.
    pub fn perform(&self, sub: &Submitted) -> Completion {
        let mut script = self.script.lock().unwrap();
        let data = script.files.get_mut(&sub.file).expect("open file");
        let end = sub.offset as usize + sub.bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[sub.offset as usize..end].copy_from_slice(&sub.bytes);
        Completion {
            echo: sub.echo,
            status: Ok(()),
        }
    }

    pub fn durable(&self, file: FileId) -> Vec<u8> {
        self.script.lock().unwrap().files[&file].clone()
    }

    pub fn closed(&self) -> Vec<FileId> {
        self.script.lock().unwrap().closed.clone()
    }

    pub fn reads(&self) -> usize {
        self.script.lock().unwrap().reads
    }
}

impl StoragePort for ScriptedPort {
    fn open(&self, _path: &Path, _mode: OpenMode) -> Result<(FileId, u64), IoError> {
        let mut script = self.script.lock().unwrap();
        if let Some(err) = script.fail_open.clone() {
            return Err(err);
        }
        script.file_seq += 1;
        let id = FileId(script.file_seq);
        let seed = script.seed.clone();
        let size = seed.len() as u64;
        script.files.insert(id, seed);
        Ok((id, size))
    }

    fn close(&self, file: FileId) -> Result<(), IoError> {
        let mut script = self.script.lock().unwrap();
        script.closed.push(file);
        if script.fail_close {
            return Err(IoError::Other {
                message: "injected close failure".into(),
            });
        }
        Ok(())
    }

    fn submit_write(&self, port: PortId, echo: Echo, file: FileId, bytes: Box<[u8]>, offset: u64) {
        self.script.lock().unwrap().submitted.push(Submitted {
            port,
            echo,
            file,
            bytes,
            offset,
        });
    }

    fn read(&self, file: FileId, dest: &mut [u8], offset: u64) -> Result<(), IoError> {
        let mut script = self.script.lock().unwrap();
        script.reads += 1;
        if script.fail_reads {
            return Err(IoError::Read {
                message: "injected read failure".into(),
            });
        }
        let data = script.files.get(&file).ok_or(IoError::UnknownFile(file))?;
        let start = offset as usize;
        let end = start + dest.len();
        if end > data.len() {
            return Err(IoError::Read {
                message: format!("short read: wanted {end}, have {}", data.len()),
            });
        }
        dest.copy_from_slice(&data[start..end]);
        Ok(())
    }
}
