use std::io;

use thiserror::Error;
use upload_relay::protocol::ParseError;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("request head error: {source}")]
    Parse {
        #[from]
        source: ParseError,
    },

    #[error("no origin for request: {reason}")]
    NoOrigin { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ProxyError {
    pub fn no_origin<S: ToString>(str: S) -> Self {
        Self::NoOrigin { reason: str.to_string() }
    }
}
