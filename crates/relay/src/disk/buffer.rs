use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{debug, trace, warn};

use super::{DiskRequest, ShardLayout};
use crate::protocol::DiskError;

const MAX_CREATE_ATTEMPTS: usize = 10;
const NAME_LEN: usize = 12;

/// One temp file buffering a single upload.
///
/// Writes are appended strictly in submission order with at most one in flight; further
/// writes queue until the previous completion is reported. Reads re-fetch the committed
/// prefix one chunk at a time through a single reusable buffer, guarded by a latch.
///
/// Completions may be reported from any thread, so the offsets, the queue, the latch and
/// the file handle sit behind one mutex.
#[derive(Debug)]
pub struct DiskBuffer {
    path: PathBuf,
    chunk_size: usize,
    state: Mutex<DiskState>,
}

#[derive(Debug)]
struct DiskState {
    file: Option<Arc<File>>,
    /// bytes committed by completed writes
    written: u64,
    /// bytes delivered by completed reads
    read: u64,
    queued: VecDeque<Bytes>,
    write_in_flight: bool,
    reading: bool,
    chunk: Option<BytesMut>,
}

/// Outcome of a completed write.
#[derive(Debug)]
pub struct WriteProgress {
    /// Total bytes on disk so far.
    pub committed: u64,
    /// The next queued write, now in flight.
    pub next: Option<DiskRequest>,
}

impl DiskBuffer {
    /// Creates a uniquely named file in a random shard of `layout`.
    pub fn create(layout: &ShardLayout, chunk_size: usize) -> Result<Self, DiskError> {
        let mut last_dir = layout.base_dir().to_path_buf();
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let dir = layout.pick();
            let name: String = rand::rng().sample_iter(Alphanumeric).take(NAME_LEN).map(char::from).collect();
            let path = dir.join(format!("upload-{name}"));

            match OpenOptions::new().read(true).write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!(path = %path.display(), "created buffer file");
                    return Ok(Self::with_file(path, file, chunk_size));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    trace!(path = %path.display(), "buffer file name taken, retrying");
                    last_dir = dir;
                }
                Err(e) => return Err(DiskError::create(dir, e)),
            }
        }
        Err(DiskError::create(last_dir, io::Error::from(ErrorKind::AlreadyExists)))
    }

    fn with_file(path: PathBuf, file: File, chunk_size: usize) -> Self {
        let state = DiskState {
            file: Some(Arc::new(file)),
            written: 0,
            read: 0,
            queued: VecDeque::new(),
            write_in_flight: false,
            reading: false,
            chunk: Some(BytesMut::with_capacity(chunk_size)),
        };
        Self { path, chunk_size, state: Mutex::new(state) }
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.lock().written
    }

    pub fn read_offset(&self) -> u64 {
        self.lock().read
    }

    pub fn is_reading(&self) -> bool {
        self.lock().reading
    }

    pub fn is_closed(&self) -> bool {
        self.lock().file.is_none()
    }

    /// Hands `data` to the buffer.
    ///
    /// Returns the request to execute when no write is in flight; otherwise the bytes wait
    /// in the queue and come back out of a later [`DiskBuffer::complete_write`].
    pub fn submit_write(&self, data: Bytes) -> Result<Option<DiskRequest>, DiskError> {
        let mut state = self.lock();
        let Some(file) = state.file.clone() else {
            return Err(DiskError::Closed);
        };
        if data.is_empty() {
            return Ok(None);
        }
        if state.write_in_flight {
            state.queued.push_back(data);
            return Ok(None);
        }
        state.write_in_flight = true;
        Ok(Some(DiskRequest::Write { file, offset: state.written, data }))
    }

    pub fn complete_write(&self, data: Bytes, result: io::Result<usize>) -> Result<WriteProgress, DiskError> {
        let mut state = self.lock();
        state.write_in_flight = false;

        let n = result.map_err(DiskError::write)?;
        if n != data.len() {
            return Err(DiskError::write(io::Error::new(ErrorKind::WriteZero, format!("short write {n} of {}", data.len()))));
        }
        // completed write bytes are released here
        drop(data);
        state.written += n as u64;

        let Some(file) = state.file.clone() else {
            return Err(DiskError::Closed);
        };
        let next = state.queued.pop_front().map(|data| DiskRequest::Write { file, offset: state.written, data });
        state.write_in_flight = next.is_some();

        Ok(WriteProgress { committed: state.written, next })
    }

    /// Starts reading the next chunk of the first `total` bytes, unless a read is already in
    /// flight or nothing committed is left unread.
    pub fn submit_read(&self, total: u64) -> Option<DiskRequest> {
        let mut state = self.lock();
        if state.reading {
            return None;
        }
        let file = state.file.clone()?;
        let available = state.written.min(total).saturating_sub(state.read);
        if available == 0 {
            return None;
        }
        let len = usize::try_from(available).map_or(self.chunk_size, |available| available.min(self.chunk_size));
        let chunk = state.chunk.take().unwrap_or_else(|| BytesMut::with_capacity(self.chunk_size));

        state.reading = true;
        Some(DiskRequest::Read { file, offset: state.read, chunk, len })
    }

    /// Takes back the chunk buffer and returns the bytes it delivered.
    pub fn complete_read(&self, mut chunk: BytesMut, result: io::Result<usize>) -> Result<Bytes, DiskError> {
        let mut state = self.lock();
        state.reading = false;

        let outcome = result.map_err(DiskError::read).map(|n| {
            let n = n.min(chunk.len());
            state.read += n as u64;
            Bytes::copy_from_slice(&chunk[..n])
        });

        chunk.clear();
        state.chunk = Some(chunk);
        outcome
    }

    /// Drops the file handle, discards queued writes and removes the file.
    ///
    /// Returns `false` when the buffer was already closed. Requests still in flight keep
    /// their own handle, so the descriptor stays valid until they complete.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.file.take().is_none() {
            return false;
        }
        let discarded = state.queued.len();
        state.queued.clear();
        drop(state);

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), discarded, "removed buffer file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), cause = %e, "can't remove buffer file"),
        }
        true
    }
}

impl Drop for DiskBuffer {
    fn drop(&mut self) {
        self.close();
    }
}
