//! Disk buffering of request bodies.
//!
//! - [`ShardLayout`]: where temp files live and how the directories are prepared
//! - [`DiskBuffer`]: one temp file per session, serialising writes and chunked reads
//! - [`DiskRequest`] / [`DiskCompletion`]: the owned units of work handed to disk workers

mod aio;
mod buffer;
mod layout;

pub use aio::DiskCompletion;
pub use aio::DiskRequest;
pub use buffer::DiskBuffer;
pub use buffer::WriteProgress;
pub use layout::ShardLayout;
