//! Per-request interception.
//!
//! The [`Interceptor`] inspects every request head the host has parsed and decides
//! whether the request gets a buffering [`Relay`]. A request is left alone when it is
//! internal, is not a `POST`, is not on the allow list or cannot get a buffer.

mod rewrite;

pub use rewrite::convert_url;
pub use rewrite::resolve_host;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec::HeaderEncoder;
use crate::config::UploadConfig;
use crate::disk::{DiskBuffer, ShardLayout};
use crate::protocol::{InterceptError, RequestHeader};
use crate::relay::Relay;
use crate::stats::{SessionId, SessionTracker};

/// The host's view of one client transaction.
pub trait Transaction {
    /// Whether the request was generated by the host itself.
    fn is_internal(&self) -> bool;

    fn request_mut(&mut self) -> &mut RequestHeader;

    fn client_addr(&self) -> SocketAddr;

    /// Hands the client side of the transaction over to `relay`.
    fn intercept(&mut self, relay: Relay) -> Result<(), InterceptError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Intercepted(SessionId),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Internal,
    NotPost,
    /// no host could be determined, or the URL is not on the allow list
    NotAllowed,
    /// memory mode only: header and body exceed `mem_buffer_size`
    TooLarge,
    /// no temp file could be opened and the request does not fit in memory
    Resource,
    /// the request head could not be serialised for replay
    Unsupported,
    Registration,
}

#[derive(Debug)]
pub struct Interceptor {
    config: Arc<UploadConfig>,
    layout: ShardLayout,
    tracker: SessionTracker,
}

impl Interceptor {
    pub fn new(config: Arc<UploadConfig>) -> Self {
        Self::with_tracker(config, SessionTracker::new())
    }

    pub fn with_tracker(config: Arc<UploadConfig>, tracker: SessionTracker) -> Self {
        let layout = ShardLayout::from_config(&config);
        Self { config, layout, tracker }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn on_request<T: Transaction>(&self, txn: &mut T) -> Decision {
        match self.try_intercept(txn) {
            Ok(id) => Decision::Intercepted(id),
            Err(reason) => {
                debug!(?reason, "request not intercepted");
                Decision::Skipped(reason)
            }
        }
    }

    fn try_intercept<T: Transaction>(&self, txn: &mut T) -> Result<SessionId, SkipReason> {
        if txn.is_internal() {
            return Err(SkipReason::Internal);
        }
        if !txn.request_mut().is_post() {
            return Err(SkipReason::NotPost);
        }

        let config = &self.config;
        let request = txn.request_mut();

        if let Some(allow_list) = config.effective_allow_list() {
            if !resolve_host(request) {
                return Err(SkipReason::NotAllowed);
            }
            let url = request.uri().to_string();
            if !allow_list.contains(&url) {
                debug!(url, "url not in allow list");
                return Err(SkipReason::NotAllowed);
            }
        }

        if config.convert_url && convert_url(request, config.service_host.as_deref()) {
            debug!(uri = %request.uri(), "url converted");
        }

        let content_length = request.content_length().unwrap_or_else(|| {
            warn!("content-length missing or invalid, assuming 0");
            0
        });

        let header = match HeaderEncoder::capture(request) {
            Ok(header) => header.freeze(),
            Err(e) => {
                warn!(cause = %e, "request header can't be captured");
                return Err(SkipReason::Unsupported);
            }
        };
        let total = header.len() as u64 + content_length;
        let fits_in_memory = total <= config.mem_buffer_size as u64;

        let disk = if config.use_disk_buffer {
            match DiskBuffer::create(&self.layout, config.chunk_size) {
                Ok(disk) => Some(disk),
                Err(e) if fits_in_memory => {
                    warn!(cause = %e, total, "disk buffer unavailable, buffering in memory");
                    None
                }
                Err(e) => {
                    warn!(cause = %e, total, "disk buffer unavailable, request too large for memory");
                    return Err(SkipReason::Resource);
                }
            }
        } else if fits_in_memory {
            None
        } else {
            debug!(total, mem_buffer_size = config.mem_buffer_size, "request too large for memory buffering");
            return Err(SkipReason::TooLarge);
        };

        let relay = Relay::new(config, &self.tracker, txn.client_addr(), header, content_length, disk);
        let id = relay.id();
        let mode = relay.mode();
        if let Err(e) = txn.intercept(relay) {
            warn!(session = %id, cause = %e, "relay registration failed");
            return Err(SkipReason::Registration);
        }

        info!(session = %id, ?mode, total, "upload intercepted");
        Ok(id)
    }
}
