//! Request head codec.
//!
//! - [`HeaderDecoder`]: raw bytes to [`crate::protocol::RequestHeader`], body bytes left in place
//! - [`HeaderEncoder`]: [`crate::protocol::RequestHeader`] back to raw bytes

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
