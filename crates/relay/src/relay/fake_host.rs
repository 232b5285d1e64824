use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};

use super::Host;
use crate::disk::{DiskCompletion, DiskRequest};
use crate::protocol::{ConnId, Direction, OpId};

/// Records every host call; disk requests wait in a queue until a test runs them.
#[derive(Debug, Default)]
pub(crate) struct FakeHost {
    next_id: u64,
    pub server_header_len: usize,
    pub refuse_connect: bool,
    /// what `set_write_total` answers
    pub write_todo: u64,

    pub connects: Vec<SocketAddr>,
    pub connected: Vec<ConnId>,
    pub reads: Vec<(ConnId, OpId)>,
    pub writes: Vec<(ConnId, OpId, Option<u64>)>,
    pub sent: HashMap<OpId, BytesMut>,
    pub reenabled: Vec<OpId>,
    pub write_totals: HashMap<OpId, u64>,
    pub shutdowns: Vec<(ConnId, Direction)>,
    pub closed: Vec<ConnId>,

    pub disk: VecDeque<DiskRequest>,
    pub max_writes_in_flight: usize,
    pub max_reads_in_flight: usize,
}

impl FakeHost {
    pub fn new(server_header_len: usize) -> Self {
        Self { server_header_len, ..Self::default() }
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// A fresh client connection handle.
    pub fn conn(&mut self) -> ConnId {
        ConnId(self.next())
    }

    pub fn connected_conn(&self) -> ConnId {
        *self.connected.last().expect("no origin connection")
    }

    pub fn read_op(&self, conn: ConnId) -> OpId {
        self.reads.iter().rev().find(|(c, _)| *c == conn).map(|(_, op)| *op).expect("no read on connection")
    }

    pub fn write_op(&self, conn: ConnId) -> (OpId, Option<u64>) {
        self.writes.iter().rev().find(|(c, _, _)| *c == conn).map(|(_, op, n)| (*op, *n)).expect("no write on connection")
    }

    pub fn sent_to(&self, op: OpId) -> &[u8] {
        self.sent.get(&op).map(|buf| &buf[..]).unwrap_or_default()
    }

    pub fn pop_disk(&mut self) -> Option<DiskCompletion> {
        self.disk.pop_front().map(DiskRequest::execute)
    }
}

impl Host for FakeHost {
    fn server_request_header_len(&mut self) -> usize {
        self.server_header_len
    }

    fn connect(&mut self, client_addr: SocketAddr) -> io::Result<ConnId> {
        self.connects.push(client_addr);
        if self.refuse_connect {
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        let conn = ConnId(self.next());
        self.connected.push(conn);
        Ok(conn)
    }

    fn read(&mut self, conn: ConnId) -> OpId {
        let op = OpId(self.next());
        self.reads.push((conn, op));
        op
    }

    fn write(&mut self, conn: ConnId, nbytes: Option<u64>) -> OpId {
        let op = OpId(self.next());
        self.writes.push((conn, op, nbytes));
        op
    }

    fn send(&mut self, op: OpId, data: Bytes) {
        self.sent.entry(op).or_default().extend_from_slice(&data);
    }

    fn reenable(&mut self, op: OpId) {
        self.reenabled.push(op);
    }

    fn set_write_total(&mut self, op: OpId, total: u64) -> u64 {
        self.write_totals.insert(op, total);
        self.write_todo
    }

    fn shutdown(&mut self, conn: ConnId, direction: Direction) {
        self.shutdowns.push((conn, direction));
    }

    fn close(&mut self, conn: ConnId) {
        self.closed.push(conn);
    }

    fn submit_disk(&mut self, request: DiskRequest) {
        self.disk.push_back(request);
        let writes = self.disk.iter().filter(|r| r.is_write()).count();
        let reads = self.disk.len() - writes;
        self.max_writes_in_flight = self.max_writes_in_flight.max(writes);
        self.max_reads_in_flight = self.max_reads_in_flight.max(reads);
    }
}
