//! Asynchronous disk requests.
//!
//! A [`DiskRequest`] owns everything it touches: the file handle, the bytes to write or
//! the chunk buffer to read into. A host moves it to a worker thread, calls
//! [`DiskRequest::execute`] there and routes the resulting [`DiskCompletion`] back to the
//! session that issued it.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

#[derive(Debug)]
pub enum DiskRequest {
    Write { file: Arc<File>, offset: u64, data: Bytes },
    Read { file: Arc<File>, offset: u64, chunk: BytesMut, len: usize },
}

#[derive(Debug)]
pub enum DiskCompletion {
    Written { data: Bytes, result: io::Result<usize> },
    Read { chunk: BytesMut, result: io::Result<usize> },
}

impl DiskRequest {
    /// Performs the positional write or read. Blocks the calling thread.
    pub fn execute(self) -> DiskCompletion {
        match self {
            DiskRequest::Write { file, offset, data } => {
                let result = file.write_all_at(&data, offset).map(|()| data.len());
                DiskCompletion::Written { data, result }
            }
            DiskRequest::Read { file, offset, mut chunk, len } => {
                chunk.clear();
                chunk.resize(len, 0);
                let result = file.read_exact_at(&mut chunk[..], offset).map(|()| len);
                DiskCompletion::Read { chunk, result }
            }
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            DiskRequest::Write { offset, .. } | DiskRequest::Read { offset, .. } => *offset,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DiskRequest::Write { data, .. } => data.len(),
            DiskRequest::Read { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_write(&self) -> bool {
        matches!(self, DiskRequest::Write { .. })
    }
}
