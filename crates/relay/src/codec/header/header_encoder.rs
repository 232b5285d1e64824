//! Request head encoder.
//!
//! Serialises a [`RequestHeader`] back to its wire form: request line, header fields in
//! map order and the terminating blank line. The interceptor uses it to capture the head
//! a client sent (after any rewriting), and hosts use it to produce the head they forward.

use std::io;
use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use http::Version;
use tokio_util::codec::Encoder;
use tracing::error;

use crate::protocol::RequestHeader;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderEncoder;

impl Encoder<&RequestHeader> for HeaderEncoder {
    type Error = io::Error;

    fn encode(&mut self, header: &RequestHeader, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let version = match header.version() {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            v => {
                error!(http_version = ?v, "unsupported http version");
                return Err(io::Error::from(ErrorKind::Unsupported));
            }
        };

        dst.reserve(INIT_HEADER_SIZE);
        write!(FastWrite(dst), "{} {} {}\r\n", header.method(), header.uri(), version)?;

        for (header_name, header_value) in header.headers() {
            dst.put_slice(header_name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

impl HeaderEncoder {
    /// Encodes `header` into a fresh buffer.
    pub fn capture(header: &RequestHeader) -> io::Result<BytesMut> {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode(header, &mut dst)?;
        Ok(dst)
    }
}

/// `io::Write` adapter over `BytesMut`; space has been reserved up front.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
