//! Request head decoder.
//!
//! Parses the request line and header fields with `httparse` and leaves everything after
//! the blank line (the start of the body) in the source buffer.
//!
//! # Limits
//!
//! - Maximum number of headers: 64
//! - Maximum header size: 8KB
//! - HTTP/1.0 and HTTP/1.1 only
//!
//! Header names and values are recorded as byte ranges first and then sliced out of the
//! frozen head, so values share memory with the received bytes.

use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request};
use httparse::{Error, Status};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, RequestHeader};

/// Maximum number of headers allowed in a request
const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the entire header section
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Shortest possible request head, `GET / HTTP/1.1\r\n\r\n` without the path
const MIN_HEAD_LEN: usize = 14;

/// Decoder for HTTP request heads implementing the [`Decoder`] trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = RequestHeader;
    type Error = ParseError;

    /// Returns `Ok(None)` until the whole head is buffered, then splits it off `src`.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < MIN_HEAD_LEN {
            return Ok(None);
        }

        let mut req = httparse::Request::new(&mut []);
        let mut headers: [MaybeUninit<httparse::Header>; MAX_HEADER_NUM] = [const { MaybeUninit::uninit() }; MAX_HEADER_NUM];

        let parsed_result = req.parse_with_uninit_headers(src, &mut headers).map_err(|e| match e {
            Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e.to_string()),
        });

        match parsed_result? {
            Status::Complete(body_offset) => {
                trace!(head_size = body_offset, "parsed request head");
                ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::too_large_header(body_offset, MAX_HEADER_BYTES));

                let header_count = req.headers.len();
                ensure!(header_count <= MAX_HEADER_NUM, ParseError::too_many_headers(header_count));

                let mut header_index: [HeaderIndex; MAX_HEADER_NUM] = EMPTY_HEADER_INDEX_ARRAY;
                HeaderIndex::record(src, req.headers, &mut header_index);

                let version = match req.version {
                    Some(0) => http::Version::HTTP_10,
                    Some(1) => http::Version::HTTP_11,
                    _ => return Err(ParseError::InvalidVersion(req.version)),
                };

                let method = req.method.ok_or(ParseError::InvalidMethod)?;
                let method = http::Method::from_bytes(method.as_bytes()).map_err(|e| {
                    trace!(cause = %e, "unknown request method");
                    ParseError::InvalidMethod
                })?;
                let uri = req.path.ok_or(ParseError::InvalidUri)?;
                let uri = uri.parse::<http::Uri>().map_err(|e| {
                    trace!(cause = %e, "unparsable request target");
                    ParseError::InvalidUri
                })?;

                let mut request = Request::new(());
                *request.method_mut() = method;
                *request.uri_mut() = uri;
                *request.version_mut() = version;

                let header_bytes = src.split_to(body_offset).freeze();
                let headers = request.headers_mut();
                headers.reserve(header_count);
                for index in &header_index[..header_count] {
                    let name = HeaderName::from_bytes(&header_bytes[index.name.0..index.name.1])
                        .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                    let value = HeaderValue::from_maybe_shared(header_bytes.slice(index.value.0..index.value.1))
                        .map_err(|e| ParseError::invalid_header(e.to_string()))?;
                    headers.append(name, value);
                }

                Ok(Some(RequestHeader::from(request)))
            }
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                Ok(None)
            }
        }
    }
}

/// Byte ranges of one header's name and value within the source buffer.
#[derive(Clone, Copy)]
struct HeaderIndex {
    name: (usize, usize),
    value: (usize, usize),
}

const EMPTY_HEADER_INDEX: HeaderIndex = HeaderIndex { name: (0, 0), value: (0, 0) };

const EMPTY_HEADER_INDEX_ARRAY: [HeaderIndex; MAX_HEADER_NUM] = [EMPTY_HEADER_INDEX; MAX_HEADER_NUM];

impl HeaderIndex {
    fn record(bytes: &[u8], headers: &[httparse::Header<'_>], indices: &mut [HeaderIndex]) {
        let bytes_ptr = bytes.as_ptr() as usize;
        for (header, indices) in headers.iter().zip(indices.iter_mut()) {
            let name_start = header.name.as_ptr() as usize - bytes_ptr;
            let name_end = name_start + header.name.len();
            indices.name = (name_start, name_end);
            let value_start = header.value.as_ptr() as usize - bytes_ptr;
            let value_end = value_start + header.value.len();
            indices.value = (value_start, value_end);
        }
    }
}
