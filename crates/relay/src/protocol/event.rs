//! Events delivered by a host into a relay session.

use std::fmt::{Display, Formatter};
use std::io;

use bytes::Bytes;

use crate::disk::DiskCompletion;

/// Handle of a host-side virtual connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

/// Handle of one pending read or write operation on a virtual connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub u64);

impl Display for ConnId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl Display for OpId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug)]
pub enum ReadEvent {
    /// New bytes are available on the read side.
    Ready(Bytes),
    /// The requested number of bytes has been read.
    Complete,
    /// The peer closed its write side.
    Eos,
    Error(io::Error),
}

#[derive(Debug)]
pub enum WriteEvent {
    /// The write side drained what it was given and can take more.
    Ready,
    /// The declared number of bytes has been written.
    Complete,
    Error(io::Error),
}

#[derive(Debug)]
pub enum Event {
    /// The host handed over the client side of the intercepted transaction.
    Accept(ConnId),
    AcceptFailed,
    Read(OpId, ReadEvent),
    Write(OpId, WriteEvent),
    /// An asynchronous disk operation finished on a worker thread.
    Disk(DiskCompletion),
}

/// What a host should do with a session after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Closed,
}
