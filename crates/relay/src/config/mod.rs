//! Process-wide configuration of the upload relay.
//!
//! The configuration is loaded once at startup from a line-oriented `key value` file and
//! then shared read-only, usually as `Arc<UploadConfig>`, by the interceptor and every
//! relay session.
//!
//! ```text
//! # comment
//! use_disk_buffer   true
//! mem_buffer_size   32768
//! base_dir          /var/tmp/buffer_upload_tmp/
//! url_list_file     /etc/upload/urls.txt
//! ```
//!
//! Unknown keys and unparsable values are ignored. A missing or unreadable file yields
//! [`UploadConfig::default`].

mod loader;
mod url_list;

use std::path::PathBuf;

pub use url_list::AllowList;

pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
pub const DEFAULT_MEM_BUFFER_SIZE: usize = 32 * 1024;
pub const DEFAULT_MAX_URL_LENGTH: usize = 4096;
pub const DEFAULT_SUBDIR_NUM: usize = 64;
pub const DEFAULT_THREAD_NUM: usize = 4;
pub const DEFAULT_BASE_DIR: &str = "/var/tmp/buffer_upload_tmp";

/// Shard directories are named with two hex digits.
pub const MAX_SUBDIR_NUM: usize = 256;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Buffer bodies in a temp file instead of memory.
    pub use_disk_buffer: bool,
    /// Rewrite `/host[:port]/rest` URLs to target the embedded host.
    pub convert_url: bool,
    /// Upper bound of header plus body for memory buffering, also the read watermark.
    pub mem_buffer_size: usize,
    /// Size of one disk read-back chunk.
    pub chunk_size: usize,
    pub url_list_file: Option<PathBuf>,
    pub max_url_length: usize,
    pub allow_list: Option<AllowList>,
    pub base_dir: PathBuf,
    pub subdir_num: usize,
    /// Number of workers executing disk requests.
    pub thread_num: usize,
    /// Host name under which the relay itself is addressed.
    pub service_host: Option<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            use_disk_buffer: true,
            convert_url: false,
            mem_buffer_size: DEFAULT_MEM_BUFFER_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            url_list_file: None,
            max_url_length: DEFAULT_MAX_URL_LENGTH,
            allow_list: None,
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            subdir_num: DEFAULT_SUBDIR_NUM,
            thread_num: DEFAULT_THREAD_NUM,
            service_host: std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()),
        }
    }
}

impl UploadConfig {
    /// The allow-list to enforce, if any.
    ///
    /// A list that loaded no entries places no restriction.
    pub fn effective_allow_list(&self) -> Option<&AllowList> {
        self.allow_list.as_ref().filter(|list| !list.is_empty())
    }
}
