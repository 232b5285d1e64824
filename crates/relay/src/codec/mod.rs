//! Codecs for request heads.
//!
//! Only the head is ever parsed; bodies are relayed as opaque bytes.

mod header;

pub use header::HeaderDecoder;
pub use header::HeaderEncoder;
