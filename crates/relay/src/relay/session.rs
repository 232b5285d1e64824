use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use bytes::{Buf, Bytes};
use tracing::{debug, error, info, trace, warn};

use super::buffer::IoBuffer;
use super::host::Host;
use super::state::{BufferMode, HeaderSkip, Phase};
use crate::config::UploadConfig;
use crate::disk::{DiskBuffer, DiskCompletion};
use crate::protocol::{ConnId, DiskError, Direction, Event, OpId, ReadEvent, RelayError, SessionStatus, WriteEvent};
use crate::stats::{SessionGuard, SessionId, SessionTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    ClientRead,
    ClientWrite,
    OriginRead,
    OriginWrite,
}

/// One buffered upload.
///
/// The session reads the whole request from the client connection, keeps it in memory or
/// in a [`DiskBuffer`], and only then connects to the origin. It then writes the request
/// to the origin and streams the response back. Each half of the exchange finishes on its
/// own. The session closes once both halves are finished and no disk operation is
/// outstanding.
///
/// All state changes go through [`Relay::dispatch`]. Every failure path ends in the same
/// teardown, which runs once.
#[derive(Debug)]
pub struct Relay {
    id: SessionId,
    mode: BufferMode,
    phase: Phase,
    skip: HeaderSkip,
    client_addr: SocketAddr,
    /// request head captured from the client, replayed in place of the host-generated one
    header: Bytes,
    /// head plus declared body
    total: u64,
    /// request bytes accepted so far, head included
    forwarded: u64,
    request: IoBuffer,
    disk: Option<DiskBuffer>,
    disk_in_flight: usize,
    response_bytes: u64,
    connected: bool,

    client: Option<ConnId>,
    origin: Option<ConnId>,
    client_read: Option<OpId>,
    client_write: Option<OpId>,
    origin_read: Option<OpId>,
    origin_write: Option<OpId>,
    retired: HashSet<OpId>,

    req_finished: bool,
    resp_finished: bool,
    guard: Option<SessionGuard>,
}

impl Relay {
    /// Creates a session for a request whose head serialises to `header` and whose body is
    /// `content_length` bytes. Passing a `disk` buffer selects disk mode.
    pub fn new(
        config: &UploadConfig,
        tracker: &SessionTracker,
        client_addr: SocketAddr,
        header: Bytes,
        content_length: u64,
        disk: Option<DiskBuffer>,
    ) -> Self {
        let guard = tracker.track();
        let id = guard.id();
        let mode = if disk.is_some() { BufferMode::Disk } else { BufferMode::Memory };
        let total = header.len() as u64 + content_length;

        let mut watermark = config.mem_buffer_size;
        if mode == BufferMode::Memory && total > watermark as u64 {
            warn!(session = %id, total, watermark, "request larger than memory watermark, raising watermark");
            watermark = usize::try_from(total).unwrap_or(usize::MAX);
        }

        debug!(session = %id, ?mode, total, "relay session created");
        Self {
            id,
            mode,
            phase: Phase::Accepting,
            skip: HeaderSkip::Unknown,
            client_addr,
            header,
            total,
            forwarded: 0,
            request: IoBuffer::with_watermark(watermark),
            disk,
            disk_in_flight: 0,
            response_bytes: 0,
            connected: false,
            client: None,
            origin: None,
            client_read: None,
            client_write: None,
            origin_read: None,
            origin_write: None,
            retired: HashSet::new(),
            req_finished: false,
            resp_finished: false,
            guard: Some(guard),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn header_skip(&self) -> HeaderSkip {
        self.skip
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn response_bytes(&self) -> u64 {
        self.response_bytes
    }

    pub fn disk_path(&self) -> Option<&Path> {
        self.disk.as_ref().map(DiskBuffer::path)
    }

    pub fn status(&self) -> SessionStatus {
        if self.phase == Phase::Closed { SessionStatus::Closed } else { SessionStatus::Running }
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Feeds one host event into the session.
    ///
    /// On `Err` the session has already been torn down. It may still wait for outstanding
    /// disk completions before reaching [`SessionStatus::Closed`], so hosts keep routing
    /// events until [`Relay::is_closed`] holds.
    pub fn dispatch<H: Host>(&mut self, event: Event, host: &mut H) -> Result<SessionStatus, RelayError> {
        if self.phase == Phase::Closed {
            trace!(session = %self.id, ?event, "event after close ignored");
            return Ok(SessionStatus::Closed);
        }

        let result = match event {
            Event::Accept(conn) => self.on_accept(conn, host),
            Event::AcceptFailed => {
                warn!(session = %self.id, "client accept failed");
                self.fail(host);
                Ok(())
            }
            Event::Read(op, event) => self.on_read(op, event, host),
            Event::Write(op, event) => self.on_write(op, event, host),
            Event::Disk(completion) => self.on_disk(completion, host),
        };

        if let Err(e) = result {
            error!(session = %self.id, phase = %self.phase, cause = %e, "relay session failed");
            self.fail(host);
            self.try_close(host);
            return Err(e);
        }

        self.try_close(host);
        Ok(self.status())
    }

    fn stream_of(&self, op: OpId) -> Option<Stream> {
        if self.client_read == Some(op) {
            Some(Stream::ClientRead)
        } else if self.client_write == Some(op) {
            Some(Stream::ClientWrite)
        } else if self.origin_read == Some(op) {
            Some(Stream::OriginRead)
        } else if self.origin_write == Some(op) {
            Some(Stream::OriginWrite)
        } else {
            None
        }
    }

    fn untracked(&self, op: OpId) -> Result<(), RelayError> {
        if self.retired.contains(&op) {
            trace!(session = %self.id, %op, "event on retired operation ignored");
            Ok(())
        } else {
            Err(RelayError::protocol_violation(format!("event on unknown operation {op}")))
        }
    }

    fn on_read<H: Host>(&mut self, op: OpId, event: ReadEvent, host: &mut H) -> Result<(), RelayError> {
        match self.stream_of(op) {
            Some(Stream::ClientRead) => self.on_client_read(event, host),
            Some(Stream::OriginRead) => {
                self.on_origin_read(event, host);
                Ok(())
            }
            Some(stream) => Err(RelayError::protocol_violation(format!("read event on {stream:?} operation {op}"))),
            None => self.untracked(op),
        }
    }

    fn on_write<H: Host>(&mut self, op: OpId, event: WriteEvent, host: &mut H) -> Result<(), RelayError> {
        match self.stream_of(op) {
            Some(Stream::OriginWrite) => {
                self.on_origin_write(event, host);
                Ok(())
            }
            Some(Stream::ClientWrite) => {
                self.on_client_write(event, host);
                Ok(())
            }
            Some(stream) => Err(RelayError::protocol_violation(format!("write event on {stream:?} operation {op}"))),
            None => self.untracked(op),
        }
    }

    fn on_accept<H: Host>(&mut self, conn: ConnId, host: &mut H) -> Result<(), RelayError> {
        if self.phase != Phase::Accepting {
            return Err(RelayError::protocol_violation(format!("accept in phase {}", self.phase)));
        }
        self.client = Some(conn);
        self.client_read = Some(host.read(conn));
        self.phase = Phase::HeaderReplace;
        debug!(session = %self.id, %conn, "client connection accepted");
        Ok(())
    }

    fn on_client_read<H: Host>(&mut self, event: ReadEvent, host: &mut H) -> Result<(), RelayError> {
        match event {
            ReadEvent::Ready(data) => {
                self.absorb(data, host)?;
                // Relay::new sizes the memory watermark to the whole request, so this only
                // holds reads back if that sizing ever changes
                if let Some(op) = self.client_read
                    && (self.mode == BufferMode::Disk || self.request.below_watermark())
                {
                    host.reenable(op);
                }
            }
            ReadEvent::Complete | ReadEvent::Eos => self.end_client_read(host),
            ReadEvent::Error(e) => {
                warn!(session = %self.id, cause = %e, "client read failed");
                self.end_client_read(host);
            }
        }
        Ok(())
    }

    /// Drops the host-generated head, then forwards the captured head and any body bytes.
    fn absorb<H: Host>(&mut self, mut data: Bytes, host: &mut H) -> Result<(), RelayError> {
        if self.skip == HeaderSkip::Unknown {
            let len = host.server_request_header_len();
            debug!(session = %self.id, len, "fetched server request header length");
            self.skip.start(len);
        }

        if !self.skip.is_done() {
            let skipped = self.skip.consume(data.len());
            data.advance(skipped);
            if !self.skip.is_done() {
                return Ok(());
            }
            debug!(session = %self.id, "server request header replaced");
            self.phase = Phase::BodyForward(self.mode);
            let header = self.header.clone();
            self.forward(header, host)?;
        }

        if !data.is_empty() {
            self.forward(data, host)?;
        }
        Ok(())
    }

    fn forward<H: Host>(&mut self, mut data: Bytes, host: &mut H) -> Result<(), RelayError> {
        let remaining = self.total - self.forwarded;
        if data.len() as u64 > remaining {
            warn!(session = %self.id, extra = data.len() as u64 - remaining, "discarding bytes beyond content-length");
            data.truncate(usize::try_from(remaining).unwrap_or(data.len()));
        }
        if data.is_empty() {
            return Ok(());
        }

        self.forwarded += data.len() as u64;
        match self.mode {
            BufferMode::Memory => self.request.append(&data),
            BufferMode::Disk => self.write_disk(data, host)?,
        }

        if self.forwarded == self.total {
            debug!(session = %self.id, total = self.total, "request fully received");
            self.stop_client_read(host);
            if self.mode == BufferMode::Memory {
                self.connect(host)?;
            }
        }
        Ok(())
    }

    fn write_disk<H: Host>(&mut self, data: Bytes, host: &mut H) -> Result<(), RelayError> {
        let Some(disk) = &self.disk else {
            return Err(DiskError::Closed.into());
        };
        if let Some(request) = disk.submit_write(data)? {
            self.disk_in_flight += 1;
            host.submit_disk(request);
        }
        Ok(())
    }

    fn pump_disk<H: Host>(&mut self, host: &mut H) {
        if let Some(disk) = &self.disk
            && let Some(request) = disk.submit_read(self.total)
        {
            self.disk_in_flight += 1;
            host.submit_disk(request);
        }
    }

    fn end_client_read<H: Host>(&mut self, host: &mut H) {
        self.stop_client_read(host);
        if !self.connected && self.forwarded < self.total {
            warn!(session = %self.id, received = self.forwarded, total = self.total, "client aborted upload");
            self.release_disk();
            self.req_finished = true;
            self.resp_finished = true;
            self.phase = Phase::Finishing;
        }
    }

    fn connect<H: Host>(&mut self, host: &mut H) -> Result<(), RelayError> {
        let Some(client) = self.client else {
            return Err(RelayError::protocol_violation("connect without client connection"));
        };
        let origin = host.connect(self.client_addr).map_err(RelayError::connect)?;
        self.origin = Some(origin);
        self.connected = true;
        self.phase = Phase::Connected;
        info!(session = %self.id, %origin, total = self.total, mode = ?self.mode, "connected to origin");

        self.client_write = Some(host.write(client, None));
        self.origin_read = Some(host.read(origin));
        let origin_write = host.write(origin, Some(self.total));
        self.origin_write = Some(origin_write);

        match self.mode {
            BufferMode::Memory => {
                let data = self.request.consume(self.request.avail());
                host.send(origin_write, data);
            }
            BufferMode::Disk => self.pump_disk(host),
        }
        Ok(())
    }

    fn on_origin_write<H: Host>(&mut self, event: WriteEvent, host: &mut H) {
        match event {
            WriteEvent::Ready => {
                if self.mode == BufferMode::Disk {
                    self.pump_disk(host);
                }
            }
            WriteEvent::Error(e) => {
                warn!(session = %self.id, cause = %e, "origin write failed");
                self.stop_client_read(host);
                self.finish_request(host);
            }
            WriteEvent::Complete => self.finish_request(host),
        }
    }

    fn on_origin_read<H: Host>(&mut self, event: ReadEvent, host: &mut H) {
        match event {
            ReadEvent::Ready(data) => {
                self.response_bytes += data.len() as u64;
                if let Some(op) = self.client_write {
                    host.send(op, data);
                    host.reenable(op);
                }
            }
            ReadEvent::Complete | ReadEvent::Eos | ReadEvent::Error(_) => {
                if let ReadEvent::Error(e) = &event {
                    warn!(session = %self.id, cause = %e, "origin read failed");
                }
                self.stop_origin_read(host);
                if let Some(op) = self.client_write {
                    let todo = host.set_write_total(op, self.response_bytes);
                    if todo == 0 {
                        self.finish_response(host);
                    } else {
                        host.reenable(op);
                    }
                }
            }
        }
    }

    fn on_client_write<H: Host>(&mut self, event: WriteEvent, host: &mut H) {
        match event {
            WriteEvent::Ready => {
                if let Some(op) = self.origin_read {
                    host.reenable(op);
                }
            }
            WriteEvent::Error(e) => {
                warn!(session = %self.id, cause = %e, "client write failed");
                self.stop_origin_read(host);
                self.finish_response(host);
            }
            WriteEvent::Complete => self.finish_response(host),
        }
    }

    fn on_disk<H: Host>(&mut self, completion: DiskCompletion, host: &mut H) -> Result<(), RelayError> {
        if self.disk_in_flight == 0 {
            return Err(RelayError::protocol_violation("disk completion without outstanding request"));
        }
        self.disk_in_flight -= 1;

        let Some(disk) = &self.disk else {
            trace!(session = %self.id, "disk completion after buffer closed");
            return Ok(());
        };

        match completion {
            DiskCompletion::Written { data, result } => {
                let size = data.len();
                let progress = disk.complete_write(data, result)?;
                debug!(session = %self.id, size, committed = progress.committed, "aio write size");
                if let Some(next) = progress.next {
                    self.disk_in_flight += 1;
                    host.submit_disk(next);
                }
                if progress.committed >= self.total && !self.connected {
                    self.connect(host)?;
                }
            }
            DiskCompletion::Read { chunk, result } => {
                let data = disk.complete_read(chunk, result)?;
                let read = disk.read_offset();
                debug!(session = %self.id, size = data.len(), read, "aio read size");
                if read >= self.total {
                    self.release_disk();
                }
                if let Some(op) = self.origin_write {
                    host.send(op, data);
                    host.reenable(op);
                }
            }
        }
        Ok(())
    }

    fn retire(&mut self, op: Option<OpId>) {
        if let Some(op) = op {
            self.retired.insert(op);
        }
    }

    fn stop_client_read<H: Host>(&mut self, host: &mut H) {
        if let Some(op) = self.client_read.take() {
            self.retired.insert(op);
            if let Some(conn) = self.client {
                host.shutdown(conn, Direction::Read);
            }
        }
    }

    fn stop_origin_read<H: Host>(&mut self, host: &mut H) {
        if let Some(op) = self.origin_read.take() {
            self.retired.insert(op);
            if let Some(conn) = self.origin {
                host.shutdown(conn, Direction::Read);
            }
        }
    }

    fn finish_request<H: Host>(&mut self, host: &mut H) {
        let op = self.origin_write.take();
        self.retire(op);
        if let Some(conn) = self.origin {
            host.shutdown(conn, Direction::Write);
        }
        self.req_finished = true;
        self.release_disk();
        self.phase = Phase::Finishing;
        debug!(session = %self.id, "request half finished");
    }

    fn finish_response<H: Host>(&mut self, host: &mut H) {
        let op = self.client_write.take();
        self.retire(op);
        if let Some(conn) = self.client {
            host.shutdown(conn, Direction::Write);
        }
        self.resp_finished = true;
        self.phase = Phase::Finishing;
        debug!(session = %self.id, response = self.response_bytes, "response half finished");
    }

    fn release_disk(&mut self) {
        if let Some(disk) = self.disk.take() {
            disk.close();
        }
    }

    fn fail<H: Host>(&mut self, host: &mut H) {
        self.stop_client_read(host);
        self.stop_origin_read(host);
        let writes = [self.client_write.take(), self.origin_write.take()];
        for op in writes {
            self.retire(op);
        }
        self.release_disk();
        self.req_finished = true;
        self.resp_finished = true;
        self.phase = Phase::Finishing;
    }

    fn try_close<H: Host>(&mut self, host: &mut H) {
        if self.phase == Phase::Closed || !(self.req_finished && self.resp_finished) {
            return;
        }
        if self.disk_in_flight > 0 {
            trace!(session = %self.id, pending = self.disk_in_flight, "waiting for disk completions before close");
            return;
        }

        if let Some(conn) = self.client.take() {
            host.close(conn);
        }
        if let Some(conn) = self.origin.take() {
            host.close(conn);
        }
        self.release_disk();
        self.guard.take();
        self.phase = Phase::Closed;
        info!(session = %self.id, request = self.total, response = self.response_bytes, "relay session closed");
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::disk::{DiskRequest, ShardLayout};
    use crate::relay::fake_host::FakeHost;

    const SERVER_HEAD: &[u8] = b"POST /upload HTTP/1.1\r\nhost: origin.example.com\r\nvia: 1.1 upload-relay\r\n\r\n";

    fn client_head(content_length: u64) -> Bytes {
        Bytes::from(format!("POST /upload HTTP/1.1\r\nhost: origin.example.com\r\ncontent-length: {content_length}\r\n\r\n"))
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| b'a' + (i % 26) as u8).collect()
    }

    fn client_addr() -> SocketAddr {
        "10.0.0.7:51000".parse().unwrap()
    }

    fn memory_relay(tracker: &SessionTracker, body_len: u64) -> Relay {
        let config = UploadConfig { use_disk_buffer: false, ..UploadConfig::default() };
        Relay::new(&config, tracker, client_addr(), client_head(body_len), body_len, None)
    }

    fn disk_relay(dir: &Path, tracker: &SessionTracker, body_len: u64, chunk_size: usize) -> Relay {
        let layout = ShardLayout::new(dir, 4);
        layout.bootstrap().unwrap();
        let disk = DiskBuffer::create(&layout, chunk_size).unwrap();
        Relay::new(&UploadConfig::default(), tracker, client_addr(), client_head(body_len), body_len, Some(disk))
    }

    fn accept(relay: &mut Relay, host: &mut FakeHost) -> (ConnId, OpId) {
        let client = host.conn();
        assert_eq!(relay.dispatch(Event::Accept(client), host).unwrap(), SessionStatus::Running);
        (client, host.read_op(client))
    }

    fn send_client(relay: &mut Relay, host: &mut FakeHost, op: OpId, data: &[u8]) -> Result<SessionStatus, RelayError> {
        relay.dispatch(Event::Read(op, ReadEvent::Ready(Bytes::copy_from_slice(data))), host)
    }

    fn run_disk(relay: &mut Relay, host: &mut FakeHost) -> usize {
        let mut completions = 0;
        while let Some(completion) = host.pop_disk() {
            relay.dispatch(Event::Disk(completion), host).unwrap();
            completions += 1;
        }
        completions
    }

    #[test]
    fn memory_mode_connects_after_full_request() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let payload = body(100);
        let mut relay = memory_relay(&tracker, 100);
        let (client, read_op) = accept(&mut relay, &mut host);
        assert_eq!(relay.phase(), Phase::HeaderReplace);

        // host head split over two events, body over three
        send_client(&mut relay, &mut host, read_op, &SERVER_HEAD[..20]).unwrap();
        assert_eq!(relay.header_skip(), HeaderSkip::Skipping(SERVER_HEAD.len() - 20));

        let mut second = SERVER_HEAD[20..].to_vec();
        second.extend_from_slice(&payload[..30]);
        send_client(&mut relay, &mut host, read_op, &second).unwrap();
        assert!(relay.header_skip().is_done());
        assert_eq!(relay.phase(), Phase::BodyForward(BufferMode::Memory));

        send_client(&mut relay, &mut host, read_op, &payload[30..90]).unwrap();
        assert!(host.connects.is_empty());

        let mut last = payload[90..].to_vec();
        last.extend_from_slice(b"trailing garbage");
        send_client(&mut relay, &mut host, read_op, &last).unwrap();

        assert_eq!(host.connects, vec![client_addr()]);
        assert_eq!(relay.phase(), Phase::Connected);
        assert!(host.shutdowns.contains(&(client, Direction::Read)));
        assert_eq!(host.reenabled.iter().filter(|op| **op == read_op).count(), 3);

        let origin = host.connected_conn();
        let (origin_write, nbytes) = host.write_op(origin);
        let mut expected = client_head(100).to_vec();
        expected.extend_from_slice(&payload);
        assert_eq!(nbytes, Some(expected.len() as u64));
        assert_eq!(host.sent_to(origin_write), &expected[..]);
    }

    #[test]
    fn response_relay_closes_after_both_halves() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = memory_relay(&tracker, 4);
        let (client, read_op) = accept(&mut relay, &mut host);

        let mut request = SERVER_HEAD.to_vec();
        request.extend_from_slice(b"ping");
        send_client(&mut relay, &mut host, read_op, &request).unwrap();

        let origin = host.connected_conn();
        let (origin_write, _) = host.write_op(origin);
        let origin_read = host.read_op(origin);
        let (client_write, client_total) = host.write_op(client);
        assert_eq!(client_total, None);

        let response = Bytes::from_static(b"HTTP/1.1 200 OK\r\ncontent-length: 4\r\n\r\npong");
        relay.dispatch(Event::Read(origin_read, ReadEvent::Ready(response.clone())), &mut host).unwrap();
        assert_eq!(host.sent_to(client_write), &response[..]);
        assert!(host.reenabled.contains(&client_write));

        relay.dispatch(Event::Write(client_write, WriteEvent::Ready), &mut host).unwrap();
        assert!(host.reenabled.contains(&origin_read));

        let status = relay.dispatch(Event::Write(origin_write, WriteEvent::Complete), &mut host).unwrap();
        assert_eq!(status, SessionStatus::Running);
        assert_eq!(relay.phase(), Phase::Finishing);
        assert!(host.closed.is_empty());

        let status = relay.dispatch(Event::Read(origin_read, ReadEvent::Eos), &mut host).unwrap();
        assert_eq!(status, SessionStatus::Closed);
        assert_eq!(host.write_totals.get(&client_write), Some(&(response.len() as u64)));
        assert!(host.shutdowns.contains(&(client, Direction::Write)));
        assert_eq!(host.closed, vec![client, origin]);
        assert_eq!(relay.response_bytes(), response.len() as u64);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn response_waits_for_client_write_complete() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        host.write_todo = 10;
        let mut relay = memory_relay(&tracker, 0);
        let (client, read_op) = accept(&mut relay, &mut host);
        send_client(&mut relay, &mut host, read_op, SERVER_HEAD).unwrap();

        let origin = host.connected_conn();
        let (origin_write, _) = host.write_op(origin);
        let origin_read = host.read_op(origin);
        let (client_write, _) = host.write_op(client);

        relay.dispatch(Event::Read(origin_read, ReadEvent::Ready(Bytes::from_static(b"0123456789"))), &mut host).unwrap();
        relay.dispatch(Event::Read(origin_read, ReadEvent::Eos), &mut host).unwrap();
        relay.dispatch(Event::Write(origin_write, WriteEvent::Complete), &mut host).unwrap();
        assert!(!relay.is_closed());

        let status = relay.dispatch(Event::Write(client_write, WriteEvent::Complete), &mut host).unwrap();
        assert_eq!(status, SessionStatus::Closed);
        assert_eq!(host.closed.len(), 2);
    }

    #[test]
    fn disk_mode_serialises_disk_operations() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let payload = body(40);
        let mut relay = disk_relay(dir.path(), &tracker, 40, 8);
        let path = relay.disk_path().unwrap().to_path_buf();
        let (client, read_op) = accept(&mut relay, &mut host);

        let mut first = SERVER_HEAD.to_vec();
        first.extend_from_slice(&payload[..15]);
        send_client(&mut relay, &mut host, read_op, &first).unwrap();
        send_client(&mut relay, &mut host, read_op, &payload[15..27]).unwrap();
        send_client(&mut relay, &mut host, read_op, &payload[27..]).unwrap();
        assert_eq!(host.disk.len(), 1);
        assert!(host.connects.is_empty());
        assert!(host.shutdowns.contains(&(client, Direction::Read)));

        // four writes drain one at a time, the last one connects and starts the first read
        assert_eq!(run_disk(&mut relay, &mut host), 5);
        assert_eq!(host.max_writes_in_flight, 1);
        assert_eq!(host.connects.len(), 1);
        assert_eq!(relay.phase(), Phase::Connected);

        let origin = host.connected_conn();
        let (origin_write, nbytes) = host.write_op(origin);
        let total = relay.total();
        assert_eq!(nbytes, Some(total));

        loop {
            relay.dispatch(Event::Write(origin_write, WriteEvent::Ready), &mut host).unwrap();
            if host.disk.is_empty() {
                break;
            }
            assert_eq!(run_disk(&mut relay, &mut host), 1);
        }
        assert_eq!(host.max_reads_in_flight, 1);

        let mut expected = client_head(40).to_vec();
        expected.extend_from_slice(&payload);
        assert_eq!(host.sent_to(origin_write), &expected[..]);
        assert!(!path.exists());

        relay.dispatch(Event::Write(origin_write, WriteEvent::Complete), &mut host).unwrap();
        let origin_read = host.read_op(origin);
        let status = relay.dispatch(Event::Read(origin_read, ReadEvent::Eos), &mut host).unwrap();
        assert_eq!(status, SessionStatus::Closed);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn abort_removes_file_without_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = disk_relay(dir.path(), &tracker, 100, 16);
        let path = relay.disk_path().unwrap().to_path_buf();
        let (client, read_op) = accept(&mut relay, &mut host);

        let mut request = SERVER_HEAD.to_vec();
        request.extend_from_slice(&body(10));
        send_client(&mut relay, &mut host, read_op, &request).unwrap();
        assert_eq!(host.disk.len(), 1);

        let status = relay.dispatch(Event::Read(read_op, ReadEvent::Eos), &mut host).unwrap();
        assert!(!path.exists());
        assert_eq!(status, SessionStatus::Running);
        assert!(host.shutdowns.contains(&(client, Direction::Read)));

        // the outstanding write still completes before the session closes
        assert_eq!(run_disk(&mut relay, &mut host), 1);
        assert!(relay.is_closed());
        assert!(host.connects.is_empty());
        assert_eq!(host.closed, vec![client]);
        assert!(!path.exists());
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn abort_in_memory_mode() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = memory_relay(&tracker, 100);
        let (client, read_op) = accept(&mut relay, &mut host);

        send_client(&mut relay, &mut host, read_op, SERVER_HEAD).unwrap();
        let status = relay.dispatch(Event::Read(read_op, ReadEvent::Error(io::Error::other("reset"))), &mut host).unwrap();

        assert_eq!(status, SessionStatus::Closed);
        assert!(host.connects.is_empty());
        assert_eq!(host.closed, vec![client]);
    }

    #[test]
    fn accept_failed_closes() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = memory_relay(&tracker, 10);

        assert_eq!(relay.dispatch(Event::AcceptFailed, &mut host).unwrap(), SessionStatus::Closed);
        assert!(host.closed.is_empty());
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn disk_write_failure_fails_upload() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = disk_relay(dir.path(), &tracker, 10, 16);
        let path = relay.disk_path().unwrap().to_path_buf();
        let (client, read_op) = accept(&mut relay, &mut host);

        let mut request = SERVER_HEAD.to_vec();
        request.extend_from_slice(&body(10));
        send_client(&mut relay, &mut host, read_op, &request).unwrap();

        let Some(DiskRequest::Write { data, .. }) = host.disk.pop_front() else {
            panic!("expected a disk write");
        };
        let failed = DiskCompletion::Written { data, result: Err(io::Error::other("no space left")) };
        let result = relay.dispatch(Event::Disk(failed), &mut host);

        assert!(matches!(result, Err(RelayError::Disk { source: DiskError::Write { .. } })));
        assert!(relay.is_closed());
        assert!(!path.exists());
        assert!(host.connects.is_empty());
        assert_eq!(host.closed, vec![client]);
    }

    #[test]
    fn disk_read_failure_fails_upload() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = disk_relay(dir.path(), &tracker, 10, 16);
        let path = relay.disk_path().unwrap().to_path_buf();
        let (client, read_op) = accept(&mut relay, &mut host);

        let mut request = SERVER_HEAD.to_vec();
        request.extend_from_slice(&body(10));
        send_client(&mut relay, &mut host, read_op, &request).unwrap();

        let completion = host.pop_disk().unwrap();
        relay.dispatch(Event::Disk(completion), &mut host).unwrap();
        let origin = host.connected_conn();

        let Some(DiskRequest::Read { chunk, .. }) = host.disk.pop_front() else {
            panic!("expected a disk read");
        };
        let failed = DiskCompletion::Read { chunk, result: Err(io::Error::other("input/output error")) };
        let result = relay.dispatch(Event::Disk(failed), &mut host);

        assert!(matches!(result, Err(RelayError::Disk { source: DiskError::Read { .. } })));
        assert!(relay.is_closed());
        assert!(!path.exists());
        assert_eq!(host.closed, vec![client, origin]);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn connect_failure_closes_client() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        host.refuse_connect = true;
        let mut relay = memory_relay(&tracker, 2);
        let (client, read_op) = accept(&mut relay, &mut host);

        let mut request = SERVER_HEAD.to_vec();
        request.extend_from_slice(b"hi");
        let result = send_client(&mut relay, &mut host, read_op, &request);

        assert!(matches!(result, Err(RelayError::Connect { .. })));
        assert!(relay.is_closed());
        assert_eq!(host.closed, vec![client]);
    }

    #[test]
    fn unknown_operation_is_a_violation() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = memory_relay(&tracker, 10);
        let (client, _) = accept(&mut relay, &mut host);

        let result = relay.dispatch(Event::Read(OpId(9999), ReadEvent::Eos), &mut host);
        assert!(matches!(result, Err(RelayError::ProtocolViolation { .. })));
        assert!(relay.is_closed());
        assert_eq!(host.closed, vec![client]);

        // cleanup already ran; later events change nothing
        assert_eq!(relay.dispatch(Event::AcceptFailed, &mut host).unwrap(), SessionStatus::Closed);
        assert_eq!(host.closed, vec![client]);
        assert_eq!(tracker.live(), 0);
    }

    #[test]
    fn retired_operation_is_ignored() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = memory_relay(&tracker, 0);
        let (_, read_op) = accept(&mut relay, &mut host);
        send_client(&mut relay, &mut host, read_op, SERVER_HEAD).unwrap();
        assert_eq!(relay.phase(), Phase::Connected);

        let status = relay.dispatch(Event::Read(read_op, ReadEvent::Eos), &mut host).unwrap();
        assert_eq!(status, SessionStatus::Running);
        assert_eq!(relay.phase(), Phase::Connected);
    }

    #[test]
    fn unexpected_disk_completion_is_a_violation() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = memory_relay(&tracker, 1);
        accept(&mut relay, &mut host);

        let completion = DiskCompletion::Written { data: Bytes::from_static(b"x"), result: Ok(1) };
        let result = relay.dispatch(Event::Disk(completion), &mut host);
        assert!(matches!(result, Err(RelayError::ProtocolViolation { .. })));
    }

    #[test]
    fn second_accept_is_a_violation() {
        let tracker = SessionTracker::new();
        let mut host = FakeHost::new(SERVER_HEAD.len());
        let mut relay = memory_relay(&tracker, 1);
        accept(&mut relay, &mut host);

        let other = host.conn();
        assert!(matches!(relay.dispatch(Event::Accept(other), &mut host), Err(RelayError::ProtocolViolation { .. })));
    }

    #[test]
    fn dropping_unfinished_session_releases_resources() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = SessionTracker::new();
        let relay = disk_relay(dir.path(), &tracker, 10, 16);
        let path = relay.disk_path().unwrap().to_path_buf();
        assert_eq!(tracker.live(), 1);

        drop(relay);
        assert!(!path.exists());
        assert_eq!(tracker.live(), 0);
    }
}
