use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that terminate a single relay session.
///
/// None of these ever escape the session: the relay tears itself down through its
/// cleanup routine before handing the error back to the host for logging.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("disk buffer error: {source}")]
    Disk {
        #[from]
        source: DiskError,
    },

    #[error("origin connect failed: {source}")]
    Connect { source: io::Error },
}

impl RelayError {
    pub fn protocol_violation<S: ToString>(str: S) -> Self {
        Self::ProtocolViolation { reason: str.to_string() }
    }

    pub fn connect<E: Into<io::Error>>(e: E) -> Self {
        Self::Connect { source: e.into() }
    }
}

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("can't create buffer file under {dir}: {source}")]
    Create { dir: PathBuf, source: io::Error },

    #[error("can't prepare buffer directory {dir}: {source}")]
    Bootstrap { dir: PathBuf, source: io::Error },

    #[error("async disk write failed: {source}")]
    Write { source: io::Error },

    #[error("async disk read failed: {source}")]
    Read { source: io::Error },

    #[error("buffer file already closed")]
    Closed,
}

impl DiskError {
    pub fn create<E: Into<io::Error>>(dir: impl Into<PathBuf>, e: E) -> Self {
        Self::Create { dir: dir.into(), source: e.into() }
    }

    pub fn bootstrap<E: Into<io::Error>>(dir: impl Into<PathBuf>, e: E) -> Self {
        Self::Bootstrap { dir: dir.into(), source: e.into() }
    }

    pub fn write<E: Into<io::Error>>(e: E) -> Self {
        Self::Write { source: e.into() }
    }

    pub fn read<E: Into<io::Error>>(e: E) -> Self {
        Self::Read { source: e.into() }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("can't read url list {path}: {source}")]
    UrlList { path: PathBuf, source: io::Error },
}

impl ConfigError {
    pub fn io<E: Into<io::Error>>(path: impl Into<PathBuf>, e: E) -> Self {
        Self::Io { path: path.into(), source: e.into() }
    }

    pub fn url_list<E: Into<io::Error>>(path: impl Into<PathBuf>, e: E) -> Self {
        Self::UrlList { path: path.into(), source: e.into() }
    }
}

/// Raised by a host when it can't take over the client connection for a relay.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("intercept registration refused: {reason}")]
    Refused { reason: String },
}

impl InterceptError {
    pub fn refused<S: ToString>(str: S) -> Self {
        Self::Refused { reason: str.to_string() }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("header number exceed the limit {max_num}")]
    TooManyHeaders { max_num: usize },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid http version: {0:?}")]
    InvalidVersion(Option<u8>),

    #[error("invalid http method")]
    InvalidMethod,

    #[error("invalid http uri")]
    InvalidUri,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::TooManyHeaders { max_num }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
