//! Tokio implementation of the relay [`Host`] boundary.
//!
//! Every read operation runs as a task that reads one chunk, reports it and then parks on
//! a [`Notify`] until the session re-enables it. Every write operation runs as a task fed
//! through an unbounded command channel. Disk requests go to the blocking pool. All
//! outcomes come back to the session through a single event channel, so the session sees
//! them strictly one at a time.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use upload_relay::disk::DiskRequest;
use upload_relay::protocol::{ConnId, Direction, Event, OpId, ReadEvent, WriteEvent};
use upload_relay::relay::Host;

const READ_BUF_SIZE: usize = 16 * 1024;

/// A socket half that is either available or still being connected.
#[derive(Debug)]
enum Half<T> {
    Ready(T),
    Pending(oneshot::Receiver<T>),
}

impl<T> Half<T> {
    async fn resolve(self) -> io::Result<T> {
        match self {
            Half::Ready(half) => Ok(half),
            Half::Pending(rx) => rx.await.map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e)),
        }
    }
}

#[derive(Debug)]
enum WriteCmd {
    Data(Bytes),
    /// The write completes once this many bytes are drained.
    Total(u64),
    Shutdown,
}

#[derive(Debug, Default)]
struct Conn {
    /// bytes delivered ahead of the socket on the first read
    prefix: Vec<Bytes>,
    read: Option<Half<OwnedReadHalf>>,
    write: Option<Half<OwnedWriteHalf>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<UnboundedSender<WriteCmd>>,
}

#[derive(Debug)]
enum Op {
    Read(Arc<Notify>),
    Write { cmds: UnboundedSender<WriteCmd>, drained: Arc<AtomicU64> },
}

/// Host for one relay session.
#[derive(Debug)]
pub struct TokioHost {
    next_id: u64,
    events: UnboundedSender<Event>,
    /// `host:port` the origin connection goes to
    origin: String,
    server_header_len: usize,
    conns: HashMap<ConnId, Conn>,
    ops: HashMap<OpId, Op>,
}

impl TokioHost {
    pub fn new(origin: impl Into<String>) -> (Self, UnboundedReceiver<Event>) {
        let (events, rx) = tokio::sync::mpsc::unbounded_channel();
        let host = Self { next_id: 0, events, origin: origin.into(), server_header_len: 0, conns: HashMap::new(), ops: HashMap::new() };
        (host, rx)
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Registers the client socket as the session's client connection.
    ///
    /// Reads on it first deliver `server_head`, then `leftover` (body bytes that arrived
    /// together with the head), then whatever the socket yields.
    pub fn attach_client(&mut self, stream: TcpStream, server_head: Bytes, leftover: Bytes) -> ConnId {
        let conn = ConnId(self.next());
        self.server_header_len = server_head.len();
        let (read, write) = stream.into_split();

        let mut prefix = vec![server_head];
        if !leftover.is_empty() {
            prefix.push(leftover);
        }
        let state = Conn { prefix, read: Some(Half::Ready(read)), write: Some(Half::Ready(write)), ..Conn::default() };
        self.conns.insert(conn, state);
        conn
    }

    fn emit(events: &UnboundedSender<Event>, event: Event) {
        if let Err(e) = events.send(event) {
            trace!(event = ?e.0, "session gone, event dropped");
        }
    }
}

impl Host for TokioHost {
    fn server_request_header_len(&mut self) -> usize {
        self.server_header_len
    }

    fn connect(&mut self, client_addr: SocketAddr) -> io::Result<ConnId> {
        if self.origin.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no origin address"));
        }
        let conn = ConnId(self.next());
        let (read_tx, read_rx) = oneshot::channel();
        let (write_tx, write_rx) = oneshot::channel();

        let origin = self.origin.clone();
        debug!(%conn, %client_addr, origin, "connecting to origin");
        tokio::spawn(async move {
            match TcpStream::connect(origin.as_str()).await {
                Ok(stream) => {
                    let (read, write) = stream.into_split();
                    // a half nobody waits for anymore is simply dropped
                    let _ = read_tx.send(read);
                    let _ = write_tx.send(write);
                }
                Err(e) => warn!(origin, cause = %e, "origin connect failed"),
            }
        });

        let state = Conn { read: Some(Half::Pending(read_rx)), write: Some(Half::Pending(write_rx)), ..Conn::default() };
        self.conns.insert(conn, state);
        Ok(conn)
    }

    fn read(&mut self, conn: ConnId) -> OpId {
        let op = OpId(self.next());
        let notify = Arc::new(Notify::new());
        let events = self.events.clone();

        match self.conns.get_mut(&conn) {
            Some(state) if state.read.is_some() => {
                let half = state.read.take();
                let prefix = std::mem::take(&mut state.prefix);
                let task = tokio::spawn(read_loop(op, half, prefix, Arc::clone(&notify), events));
                state.reader = Some(task);
            }
            _ => {
                warn!(%conn, %op, "read on a connection without read side");
                Self::emit(&events, Event::Read(op, ReadEvent::Error(io::Error::from(io::ErrorKind::NotConnected))));
            }
        }

        self.ops.insert(op, Op::Read(notify));
        op
    }

    fn write(&mut self, conn: ConnId, nbytes: Option<u64>) -> OpId {
        let op = OpId(self.next());
        let (cmds, rx) = tokio::sync::mpsc::unbounded_channel();
        let drained = Arc::new(AtomicU64::new(0));
        let events = self.events.clone();

        match self.conns.get_mut(&conn) {
            Some(state) if state.write.is_some() => {
                let half = state.write.take();
                tokio::spawn(write_loop(op, half, rx, nbytes, Arc::clone(&drained), events));
                state.writer = Some(cmds.clone());
            }
            _ => {
                warn!(%conn, %op, "write on a connection without write side");
                Self::emit(&events, Event::Write(op, WriteEvent::Error(io::Error::from(io::ErrorKind::NotConnected))));
            }
        }

        self.ops.insert(op, Op::Write { cmds, drained });
        op
    }

    fn send(&mut self, op: OpId, data: Bytes) {
        match self.ops.get(&op) {
            Some(Op::Write { cmds, .. }) => {
                if cmds.send(WriteCmd::Data(data)).is_err() {
                    trace!(%op, "writer gone, data dropped");
                }
            }
            _ => warn!(%op, "send on an operation that is not a write"),
        }
    }

    fn reenable(&mut self, op: OpId) {
        match self.ops.get(&op) {
            Some(Op::Read(notify)) => notify.notify_one(),
            // writers drain whatever they are sent
            Some(Op::Write { .. }) => {}
            None => trace!(%op, "reenable on unknown operation"),
        }
    }

    fn set_write_total(&mut self, op: OpId, total: u64) -> u64 {
        let Some(Op::Write { cmds, drained }) = self.ops.get(&op) else {
            warn!(%op, "write total set on an operation that is not a write");
            return 0;
        };
        let todo = total.saturating_sub(drained.load(Ordering::Acquire));
        if todo > 0 && cmds.send(WriteCmd::Total(total)).is_err() {
            trace!(%op, "writer gone, nothing left to write");
            return 0;
        }
        todo
    }

    fn shutdown(&mut self, conn: ConnId, direction: Direction) {
        let Some(state) = self.conns.get_mut(&conn) else {
            return;
        };
        match direction {
            Direction::Read => {
                if let Some(task) = state.reader.take() {
                    task.abort();
                }
                state.read.take();
            }
            Direction::Write => {
                if let Some(writer) = state.writer.take() {
                    // a closed channel already ended the writer, which dropped its half
                    let _ = writer.send(WriteCmd::Shutdown);
                }
                state.write.take();
            }
        }
        trace!(%conn, ?direction, "connection shut down");
    }

    fn close(&mut self, conn: ConnId) {
        if let Some(state) = self.conns.remove(&conn)
            && let Some(task) = state.reader
        {
            task.abort();
        }
        debug!(%conn, "connection closed");
    }

    fn submit_disk(&mut self, request: DiskRequest) {
        let events = self.events.clone();
        tokio::task::spawn_blocking(move || {
            let completion = request.execute();
            Self::emit(&events, Event::Disk(completion));
        });
    }
}

async fn read_loop(op: OpId, half: Option<Half<OwnedReadHalf>>, prefix: Vec<Bytes>, notify: Arc<Notify>, events: UnboundedSender<Event>) {
    for chunk in prefix {
        TokioHost::emit(&events, Event::Read(op, ReadEvent::Ready(chunk)));
        notify.notified().await;
    }

    let Some(half) = half else {
        return;
    };
    let mut reader = match half.resolve().await {
        Ok(reader) => reader,
        Err(e) => {
            TokioHost::emit(&events, Event::Read(op, ReadEvent::Error(e)));
            return;
        }
    };

    loop {
        let mut buf = BytesMut::with_capacity(READ_BUF_SIZE);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                TokioHost::emit(&events, Event::Read(op, ReadEvent::Eos));
                return;
            }
            Ok(n) => {
                trace!(%op, n, "read chunk");
                TokioHost::emit(&events, Event::Read(op, ReadEvent::Ready(buf.freeze())));
                notify.notified().await;
            }
            Err(e) => {
                TokioHost::emit(&events, Event::Read(op, ReadEvent::Error(e)));
                return;
            }
        }
    }
}

async fn write_loop(
    op: OpId,
    half: Option<Half<OwnedWriteHalf>>,
    mut cmds: UnboundedReceiver<WriteCmd>,
    mut total: Option<u64>,
    drained: Arc<AtomicU64>,
    events: UnboundedSender<Event>,
) {
    let Some(half) = half else {
        return;
    };
    let mut writer = match half.resolve().await {
        Ok(writer) => writer,
        Err(e) => {
            TokioHost::emit(&events, Event::Write(op, WriteEvent::Error(e)));
            return;
        }
    };

    let mut completed = false;
    while let Some(cmd) = cmds.recv().await {
        match cmd {
            WriteCmd::Data(data) => {
                if let Err(e) = writer.write_all(&data).await {
                    TokioHost::emit(&events, Event::Write(op, WriteEvent::Error(e)));
                    return;
                }
                let written = drained.fetch_add(data.len() as u64, Ordering::AcqRel) + data.len() as u64;
                if !completed && total.is_some_and(|total| written >= total) {
                    completed = true;
                    TokioHost::emit(&events, Event::Write(op, WriteEvent::Complete));
                } else if !completed {
                    TokioHost::emit(&events, Event::Write(op, WriteEvent::Ready));
                }
            }
            WriteCmd::Total(n) => {
                total = Some(n);
                if !completed && drained.load(Ordering::Acquire) >= n {
                    completed = true;
                    TokioHost::emit(&events, Event::Write(op, WriteEvent::Complete));
                }
            }
            WriteCmd::Shutdown => {
                if let Err(e) = writer.shutdown().await {
                    debug!(%op, cause = %e, "write shutdown failed");
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn client_reads_deliver_prefix_first() {
        let (mut peer, stream) = pair().await;
        let (mut host, mut events) = TokioHost::new("127.0.0.1:9");
        let conn = host.attach_client(stream, Bytes::from_static(b"HEAD"), Bytes::from_static(b"left"));
        assert_eq!(host.server_request_header_len(), 4);

        peer.write_all(b"socket").await.unwrap();
        let op = host.read(conn);

        let mut chunks = Vec::new();
        for _ in 0..3 {
            let Some(Event::Read(got, ReadEvent::Ready(data))) = events.recv().await else {
                panic!("expected a ready read");
            };
            assert_eq!(got, op);
            chunks.push(data);
            host.reenable(op);
        }
        assert_eq!(chunks, vec![Bytes::from_static(b"HEAD"), Bytes::from_static(b"left"), Bytes::from_static(b"socket")]);

        drop(peer);
        assert!(matches!(events.recv().await, Some(Event::Read(_, ReadEvent::Eos))));
    }

    #[tokio::test]
    async fn write_completes_at_total() {
        let (mut peer, stream) = pair().await;
        let (mut host, mut events) = TokioHost::new("127.0.0.1:9");
        let conn = host.attach_client(stream, Bytes::new(), Bytes::new());

        let op = host.write(conn, None);
        host.send(op, Bytes::from_static(b"hello"));
        assert!(matches!(events.recv().await, Some(Event::Write(_, WriteEvent::Ready))));

        // everything already drained: no completion event will follow
        assert_eq!(host.set_write_total(op, 5), 0);

        host.shutdown(conn, Direction::Write);
        let mut received = Vec::new();
        peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn failed_connect_surfaces_as_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (mut host, mut events) = TokioHost::new(addr.to_string());
        let origin = host.connect(addr).unwrap();
        host.read(origin);
        host.write(origin, Some(10));

        let mut errors = 0;
        while errors < 2 {
            match events.recv().await {
                Some(Event::Read(_, ReadEvent::Error(_)) | Event::Write(_, WriteEvent::Error(_))) => errors += 1,
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
