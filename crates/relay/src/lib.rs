//! Buffering relay for HTTP POST uploads
//!
//! Slow clients uploading large request bodies tie up origin server workers for as long as
//! the upload takes. This crate buffers the whole request, in memory or in a temp file on
//! disk, and only opens the origin connection once the request is complete. The origin then
//! receives the request at local speed and the response is streamed straight back.
//!
//! The crate does no socket I/O of its own. A host (a proxy, see the `upload-proxy` crate)
//! parses request heads, asks the [`intercept::Interceptor`] whether to buffer a request,
//! and drives the resulting [`relay::Relay`] by feeding it [`protocol::Event`]s and serving
//! the callbacks of the [`relay::Host`] trait.
//!
//! # Modules
//!
//! - [`config`]: process-wide settings loaded from a `key value` file
//! - [`intercept`]: per-request decision and URL rewriting
//! - [`relay`]: the per-upload state machine
//! - [`disk`]: temp file layout and serialised positional disk I/O
//! - [`codec`]: request head decoding and encoding
//! - [`protocol`]: shared request, event and error types
//! - [`stats`]: the `upload_vc.count` live session gauge
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use upload_relay::config::UploadConfig;
//! use upload_relay::disk::ShardLayout;
//! use upload_relay::intercept::Interceptor;
//!
//! let mut config = UploadConfig::load("upload.conf");
//! if config.use_disk_buffer && ShardLayout::from_config(&config).bootstrap().is_err() {
//!     config.use_disk_buffer = false;
//! }
//! let interceptor = Interceptor::new(Arc::new(config));
//! // for every parsed request: interceptor.on_request(&mut transaction)
//! # let _ = interceptor;
//! ```

pub mod codec;
pub mod config;
pub mod disk;
pub mod intercept;
pub mod protocol;
pub mod relay;
pub mod stats;

mod utils;
pub(crate) use utils::ensure;
