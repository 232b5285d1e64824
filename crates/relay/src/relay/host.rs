use std::io;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::disk::DiskRequest;
use crate::protocol::{ConnId, Direction, OpId};

/// What a relay session needs from the proxy hosting it.
///
/// The host owns the sockets and the disk workers. Everything it observes comes back to
/// the session as an [`crate::protocol::Event`], delivered one at a time.
///
/// Read operations deliver one `Ready` and then wait for [`Host::reenable`]. Write
/// operations report `Ready` whenever the data handed over with [`Host::send`] has drained.
pub trait Host {
    /// Length of the request head the host generated in front of the client body.
    fn server_request_header_len(&mut self) -> usize;

    /// Opens the origin-facing connection on behalf of `client_addr`.
    fn connect(&mut self, client_addr: SocketAddr) -> io::Result<ConnId>;

    /// Starts reading `conn` until end of stream.
    fn read(&mut self, conn: ConnId) -> OpId;

    /// Starts a write on `conn` that completes after `nbytes`, or stays open when `None`.
    fn write(&mut self, conn: ConnId, nbytes: Option<u64>) -> OpId;

    fn send(&mut self, op: OpId, data: Bytes);

    fn reenable(&mut self, op: OpId);

    /// Fixes the total of an open-ended write and returns how many bytes are still to go.
    ///
    /// A return of `0` means the write is done and no `Complete` event will follow.
    fn set_write_total(&mut self, op: OpId, total: u64) -> u64;

    fn shutdown(&mut self, conn: ConnId, direction: Direction);

    fn close(&mut self, conn: ConnId);

    /// Runs `request` on a disk worker and delivers its completion as `Event::Disk`.
    fn submit_disk(&mut self, request: DiskRequest);
}
