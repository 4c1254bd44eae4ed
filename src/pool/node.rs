//! The per-URL node record.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// One broker node: at most one live client, plus the bookkeeping the
/// selection policies and the supervision tasks need.
///
/// Created once at pool construction and never removed; only field values
/// change. The atomics are readable without the lock; everything else is
/// guarded by `inner`. Lock order is always pool lock first, node lock
/// second.
pub(crate) struct Node<C> {
    pub(crate) url: String,
    /// Successful selections. Monotonic.
    pub(crate) total_used: AtomicU64,
    /// Failed connect attempts. Monotonic.
    pub(crate) failures: AtomicU64,
    pub(crate) inner: RwLock<NodeInner<C>>,
}

pub(crate) struct NodeInner<C> {
    /// The currently-owned single-connection client, if any. Replaced only by
    /// the connector, and only after the previous client was asked to close.
    pub(crate) client: Option<Arc<C>>,
    /// Liveness flag. True only while `client` is present and was last seen
    /// connected; the watcher and the prober converge it back to reality.
    pub(crate) healthy: bool,
    pub(crate) weight: u32,
    pub(crate) last_used: SystemTime,
    /// Re-entrancy guard: at most one connector run per node at a time.
    pub(crate) connecting: bool,
}

impl<C> Node<C> {
    pub(crate) fn new(url: String) -> Self {
        Self {
            url,
            total_used: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            inner: RwLock::new(NodeInner {
                client: None,
                healthy: false,
                weight: 1,
                last_used: SystemTime::now(),
                connecting: false,
            }),
        }
    }

    /// Claim the connector slot. Returns false when a run is already in
    /// flight, in which case the caller must back off.
    pub(crate) fn begin_connect(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.connecting {
            false
        } else {
            inner.connecting = true;
            true
        }
    }

    /// Release the connector slot without touching anything else.
    pub(crate) fn abort_connect(&self) {
        self.inner.write().connecting = false;
    }

    /// Detach the current client, if any, so it can be closed. The connector
    /// slot stays claimed.
    pub(crate) fn take_client(&self) -> Option<Arc<C>> {
        self.inner.write().client.take()
    }

    /// Install a freshly-connected client, mark the node healthy, and release
    /// the connector slot.
    pub(crate) fn install_client(&self, client: Arc<C>) {
        let mut inner = self.inner.write();
        inner.client = Some(client);
        inner.healthy = true;
        inner.connecting = false;
    }

    /// Record a failed connect attempt and release the connector slot.
    pub(crate) fn fail_connect(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write();
        inner.healthy = false;
        inner.connecting = false;
    }

    pub(crate) fn mark_unhealthy(&self) {
        self.inner.write().healthy = false;
    }

    /// Whether `client` is still the node's current client. Watchers use this
    /// to notice they have been superseded by a reconnect.
    pub(crate) fn holds_client(&self, client: &Arc<C>) -> bool {
        self.inner
            .read()
            .client
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, client))
    }

    pub(crate) fn weight(&self) -> u32 {
        self.inner.read().weight
    }
}
