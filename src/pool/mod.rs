//! The supervised multi-node connection pool.

mod node;
mod selector;
mod supervision;

use crate::configuration::PoolConfig;
use crate::error::Error;
use crate::transport::{AmqpConnector, NodeClient, NodeConnector};
use node::Node;
use parking_lot::RwLock;
use selector::HealthyNode;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The pool most applications want: [`Pool`] over the lapin-backed
/// [`AmqpConnector`].
pub type AmqpPool = Pool<AmqpConnector>;

/// A pool of single-connection clients, one per broker node.
///
/// The pool owns one [`NodeClient`] per configured URL, keeps each connection
/// alive through background supervision, and picks a healthy one per
/// [`get_client`](Pool::get_client) call according to the configured
/// load-balancing policy.
///
/// `Pool` is cheap to clone; all clones share the same state, and the
/// background tasks hold clones themselves.
pub struct Pool<T: NodeConnector> {
    pub(crate) inner: Arc<PoolInner<T>>,
}

impl<T: NodeConnector> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct PoolInner<T: NodeConnector> {
    pub(crate) config: PoolConfig,
    pub(crate) connector: T,
    /// One entry per configured URL; length and order are fixed for the life
    /// of the pool.
    pub(crate) nodes: Vec<Arc<Node<T::Client>>>,
    /// The pool-level lock: guards the closed flag. Always acquired before
    /// any node lock, never after.
    pub(crate) closed: RwLock<bool>,
    pub(crate) round_robin: AtomicU64,
    pub(crate) total_requests: AtomicU64,
    pub(crate) total_failures: AtomicU64,
    /// Fans out to every background task and to in-flight connects.
    pub(crate) cancel: CancellationToken,
}

impl Pool<AmqpConnector> {
    /// Build a pool over RabbitMQ nodes. Performs no I/O and starts no
    /// background work; call [`start`](Pool::start) for that.
    pub fn new(config: PoolConfig) -> Self {
        let connector = AmqpConnector::from_config(&config);
        Self::with_connector(config, connector)
    }
}

impl<T: NodeConnector> Pool<T> {
    /// Build a pool over a custom [`NodeConnector`]. Performs no I/O.
    pub fn with_connector(config: PoolConfig, connector: T) -> Self {
        let nodes = config
            .urls()
            .into_iter()
            .map(|url| Arc::new(Node::new(url)))
            .collect();

        Self {
            inner: Arc::new(PoolInner {
                config,
                connector,
                nodes,
                closed: RwLock::new(false),
                round_robin: AtomicU64::new(0),
                total_requests: AtomicU64::new(0),
                total_failures: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Launch the background supervision: one connector run per node plus the
    /// periodic health prober.
    ///
    /// Returns as soon as the tasks are spawned. The pool is usable
    /// immediately, but [`get_client`](Pool::get_client) will fail until at
    /// least one node has connected; poll
    /// [`healthy_node_count`](Pool::healthy_node_count) when readiness
    /// matters.
    pub fn start(&self) -> Result<(), Error> {
        let closed = self.inner.closed.read();
        if *closed {
            return Err(Error::PoolClosed);
        }

        for node in &self.inner.nodes {
            self.spawn_connector(node.clone());
        }
        self.spawn_prober();

        info!("pool started with {} nodes", self.inner.nodes.len());
        Ok(())
    }

    /// Pick a healthy node according to the configured policy and return its
    /// client.
    ///
    /// Synchronous and I/O-free. The returned handle is shared and
    /// non-owning: do not close it, and be prepared for it to report
    /// disconnected if the node fails afterwards; just call `get_client`
    /// again.
    pub fn get_client(&self) -> Result<Arc<T::Client>, Error> {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);

        let closed = self.inner.closed.read();
        if *closed {
            self.inner.total_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::PoolClosed);
        }

        let healthy = self.healthy_nodes();
        if healthy.is_empty() {
            self.inner.total_failures.fetch_add(1, Ordering::Relaxed);
            return Err(Error::NoHealthyNodes);
        }

        let (node, client) = selector::select(
            self.inner.config.strategy,
            &healthy,
            &self.inner.round_robin,
        );
        node.total_used.fetch_add(1, Ordering::Relaxed);
        node.inner.write().last_used = SystemTime::now();

        Ok(client.clone())
    }

    /// Snapshot of the nodes that are currently usable: flagged healthy, with
    /// a client whose transport reports open. Preserves node index order.
    fn healthy_nodes(&self) -> Vec<HealthyNode<T::Client>> {
        self.inner
            .nodes
            .iter()
            .filter_map(|node| {
                let inner = node.inner.read();
                match &inner.client {
                    Some(client) if inner.healthy && client.is_connected() => {
                        Some((node.clone(), client.clone()))
                    }
                    _ => None,
                }
            })
            .collect()
    }

    /// The number of nodes currently satisfying the healthy predicate.
    pub fn healthy_node_count(&self) -> usize {
        let _closed = self.inner.closed.read();
        self.inner
            .nodes
            .iter()
            .filter(|node| {
                let inner = node.inner.read();
                inner.healthy
                    && inner
                        .client
                        .as_ref()
                        .is_some_and(|client| client.is_connected())
            })
            .count()
    }

    /// Set the weight of the node identified by `url`.
    ///
    /// Weights only influence [`WeightedRoundRobin`][crate::LoadBalanceStrategy];
    /// a weight of 0 takes the node out of the weighted draw but leaves it
    /// selectable by every other policy.
    pub fn set_node_weight(&self, url: &str, weight: u32) -> Result<(), Error> {
        let _closed = self.inner.closed.read();
        for node in &self.inner.nodes {
            if node.url == url {
                node.inner.write().weight = weight;
                info!(url, weight, "updated node weight");
                return Ok(());
            }
        }
        Err(Error::NodeNotFound(url.to_owned()))
    }

    /// A point-in-time snapshot of the pool's counters and per-node state.
    ///
    /// Each node's tuple is internally consistent; the snapshot as a whole is
    /// not atomic across nodes.
    pub fn stats(&self) -> PoolStats {
        let _closed = self.inner.closed.read();

        let mut nodes = Vec::with_capacity(self.inner.nodes.len());
        let mut healthy_nodes = 0;
        for node in &self.inner.nodes {
            let inner = node.inner.read();
            let connected = inner
                .client
                .as_ref()
                .is_some_and(|client| client.is_connected());
            if inner.healthy {
                healthy_nodes += 1;
            }
            nodes.push(NodeStats {
                url: node.url.clone(),
                healthy: inner.healthy,
                connected,
                total_used: node.total_used.load(Ordering::Relaxed),
                failures: node.failures.load(Ordering::Relaxed),
                weight: inner.weight,
                last_used: inner.last_used,
            });
        }

        PoolStats {
            total_nodes: self.inner.nodes.len(),
            healthy_nodes,
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            total_failures: self.inner.total_failures.load(Ordering::Relaxed),
            nodes,
        }
    }

    /// Shut the pool down: stop every background task and close every node's
    /// client.
    ///
    /// Idempotent: the second and later calls are no-ops returning `Ok`.
    /// Per-node close failures are collected into
    /// [`Error::CloseFailure`]; after `close` returns no component performs
    /// further I/O.
    pub async fn close(&self) -> Result<(), Error> {
        {
            let mut closed = self.inner.closed.write();
            if *closed {
                return Ok(());
            }
            *closed = true;
        }

        self.inner.cancel.cancel();

        let mut errors = Vec::new();
        for node in &self.inner.nodes {
            let client = {
                let mut inner = node.inner.write();
                inner.healthy = false;
                inner.client.take()
            };
            if let Some(client) = client {
                if let Err(error) = client.close().await {
                    errors.push((node.url.clone(), error));
                }
            }
        }

        info!("pool closed");
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::CloseFailure(errors))
        }
    }
}

/// Point-in-time pool statistics, as returned by [`Pool::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub total_requests: u64,
    pub total_failures: u64,
    pub nodes: Vec<NodeStats>,
}

/// Per-node statistics inside a [`PoolStats`] snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub url: String,
    /// The node's liveness flag as last converged by the supervision tasks.
    pub healthy: bool,
    /// Whether the node's client transport reported open at snapshot time.
    pub connected: bool,
    pub total_used: u64,
    pub failures: u64,
    pub weight: u32,
    pub last_used: SystemTime,
}
