//! TCP front end: accepts client connections and hands each request to the interceptor.
//!
//! One request is served per client connection. Intercepted uploads are driven by a
//! relay session; everything else is forwarded unbuffered to the origin.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use http::HeaderValue;
use http::header::{CONNECTION, VIA};
use http::uri::Authority;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, info, warn};
use upload_relay::codec::{HeaderDecoder, HeaderEncoder};
use upload_relay::intercept::{Decision, Interceptor, Transaction};
use upload_relay::protocol::{InterceptError, RequestHeader};
use upload_relay::relay::Relay;
use upload_relay::stats::UPLOAD_VC_COUNT;

use crate::error::ProxyError;
use crate::host::TokioHost;
use crate::session::run_session;

const DEFAULT_PORT: u16 = 80;
const VIA_VALUE: &str = "1.1 upload-relay";
const VIA_TOKEN: &str = "upload-relay";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    interceptor: Arc<Interceptor>,
}

impl Server {
    pub async fn bind<A: ToSocketAddrs>(address: A, interceptor: Interceptor) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, interceptor: Arc::new(interceptor) })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(self) {
        match self.local_addr() {
            Ok(addr) => info!(%addr, "start listening"),
            Err(e) => warn!(cause = %e, "listener has no local address"),
        }

        loop {
            let (tcp_stream, remote_addr) = match self.listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            let interceptor = Arc::clone(&self.interceptor);
            tokio::spawn(async move {
                match handle_connection(tcp_stream, remote_addr, interceptor).await {
                    Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
                    Err(e) => error!(%remote_addr, cause = %e, "connection failed"),
                }
            });
        }
    }
}

/// The host side of one client request.
#[derive(Debug)]
struct ProxyTxn {
    request: RequestHeader,
    client_addr: SocketAddr,
    relay: Option<Relay>,
}

impl Transaction for ProxyTxn {
    /// Requests that already went through an upload relay are not buffered twice.
    fn is_internal(&self) -> bool {
        self.request.headers().get_all(VIA).iter().any(|value| value.to_str().is_ok_and(|v| v.contains(VIA_TOKEN)))
    }

    fn request_mut(&mut self) -> &mut RequestHeader {
        &mut self.request
    }

    fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    fn intercept(&mut self, relay: Relay) -> Result<(), InterceptError> {
        if self.relay.is_some() {
            return Err(InterceptError::refused("transaction already intercepted"));
        }
        self.relay = Some(relay);
        Ok(())
    }
}

async fn handle_connection(stream: TcpStream, client_addr: SocketAddr, interceptor: Arc<Interceptor>) -> Result<(), ProxyError> {
    let mut framed = FramedRead::with_capacity(stream, HeaderDecoder, 8 * 1024);
    let mut request = match framed.next().await {
        Some(Ok(request)) => request,
        Some(Err(e)) => return Err(e.into()),
        None => {
            debug!(%client_addr, "connection closed before a request head");
            return Ok(());
        }
    };
    // body bytes that arrived with the head
    let leftover = framed.read_buffer_mut().split().freeze();
    let stream = framed.into_inner();

    close_after_response(&mut request);
    let mut txn = ProxyTxn { request, client_addr, relay: None };
    let decision = interceptor.on_request(&mut txn);
    let ProxyTxn { mut request, relay, .. } = txn;

    match (decision, relay) {
        (Decision::Intercepted(id), Some(relay)) => {
            let origin = origin_target(&request).unwrap_or_default();
            debug!(session = %id, origin, "relaying buffered upload");

            request.headers_mut().append(VIA, HeaderValue::from_static(VIA_VALUE));
            let server_head = HeaderEncoder::capture(&request)?.freeze();
            let (mut host, events) = TokioHost::new(origin);
            let client = host.attach_client(stream, server_head, leftover);
            run_session(relay, host, events, client).await;
            debug!(session = %id, stat = UPLOAD_VC_COUNT, value = interceptor.tracker().live(), "upload session finished");
            Ok(())
        }
        _ => passthrough(stream, &request, leftover).await,
    }
}

/// Forwards the request unbuffered and pipes both directions until either side closes.
async fn passthrough(mut client: TcpStream, request: &RequestHeader, leftover: Bytes) -> Result<(), ProxyError> {
    let Some(origin) = origin_target(request) else {
        client.write_all(BAD_GATEWAY).await?;
        return Err(ProxyError::no_origin(request.uri()));
    };

    let mut server = match TcpStream::connect(origin.as_str()).await {
        Ok(server) => server,
        Err(e) => {
            warn!(origin, cause = %e, "origin connect failed");
            client.write_all(BAD_GATEWAY).await?;
            return Err(e.into());
        }
    };

    let head = HeaderEncoder::capture(request)?;
    server.write_all(&head).await?;
    server.write_all(&leftover).await?;

    let (sent, received) = tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    debug!(origin, sent, received, "passthrough finished");
    Ok(())
}

/// Asks the origin to close after its response, so the response ends at end of stream.
fn close_after_response(request: &mut RequestHeader) {
    request.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
}

/// `host:port` of the origin, from the URL authority or else the `Host` header.
fn origin_target(request: &RequestHeader) -> Option<String> {
    if let Some(host) = request.uri().host() {
        let port = request.uri().port_u16().unwrap_or(DEFAULT_PORT);
        return Some(format!("{host}:{port}"));
    }
    let authority: Authority = request.host_header()?.parse().ok()?;
    Some(format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(DEFAULT_PORT)))
}
