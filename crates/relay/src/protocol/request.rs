//! Request head handling for intercepted uploads.
//!
//! [`RequestHeader`] wraps `http::Request<()>`. The interceptor inspects and rewrites it
//! in place (URL authority, `Host` header) before the head is captured for the relay.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version};

/// A parsed HTTP request head without a body.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn set_uri(&mut self, uri: Uri) {
        *self.inner.uri_mut() = uri;
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    pub fn is_post(&self) -> bool {
        self.method() == Method::POST
    }

    /// The declared `Content-Length`.
    ///
    /// Returns `None` when the header is absent or its value is not a decimal `u64`.
    pub fn content_length(&self) -> Option<u64> {
        self.headers().get(http::header::CONTENT_LENGTH)?.to_str().ok()?.trim().parse::<u64>().ok()
    }

    /// Value of the `Host` header, when present and printable.
    pub fn host_header(&self) -> Option<&str> {
        self.headers().get(http::header::HOST)?.to_str().ok()
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}
