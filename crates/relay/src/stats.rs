//! Live session statistics, exported as `upload_vc.count`.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

pub const UPLOAD_VC_COUNT: &str = "upload_vc.count";

/// Identifier of one relay session, unique within its tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "upload-{}", self.0)
    }
}

/// Counts live relay sessions. Cloning shares the counters.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    live: AtomicU64,
    created: AtomicU64,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new live session. The returned guard decrements the count on drop.
    pub fn track(&self) -> SessionGuard {
        self.inner.live.fetch_add(1, Ordering::SeqCst);
        let id = SessionId(self.inner.created.fetch_add(1, Ordering::Relaxed) + 1);
        SessionGuard { counters: Arc::clone(&self.inner), id }
    }

    /// Current value of `upload_vc.count`.
    pub fn live(&self) -> u64 {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> u64 {
        self.inner.created.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct SessionGuard {
    counters: Arc<Counters>,
    id: SessionId,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        trace!(session = %self.id, "session released");
    }
}
