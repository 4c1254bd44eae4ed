//! The background agents that keep the pool healthy: the per-node connector,
//! the per-client liveness watcher, and the pool-level health prober.
//!
//! Each agent is a spawned task holding a clone of the pool; all of them bail
//! out at their next synchronization point once the pool's cancellation token
//! fires. A blocked connect on one node never stalls the supervision of
//! another.

use crate::error::Error;
use crate::pool::node::Node;
use crate::pool::Pool;
use crate::transport::{NodeClient, NodeConnector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poll period of the per-client liveness watcher. Intentionally independent
/// of the configurable health-probe interval.
pub(crate) const WATCH_INTERVAL: Duration = Duration::from_secs(10);

impl<T: NodeConnector> Pool<T> {
    /// Kick off an asynchronous connector run for `node`. A no-op if another
    /// run is already in flight for the same node.
    pub(crate) fn spawn_connector(&self, node: Arc<Node<T::Client>>) {
        let pool = self.clone();
        tokio::spawn(async move { pool.connect_node(node).await });
    }

    /// The connector state machine: disconnected -> connecting -> connected,
    /// or back to disconnected with a retry timer armed.
    async fn connect_node(self, node: Arc<Node<T::Client>>) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if !node.begin_connect() {
            return;
        }

        debug!(url = %node.url, "connecting to node");
        let connected = self
            .inner
            .connector
            .connect(&node.url, self.inner.cancel.clone())
            .await;

        match connected {
            Ok(client) => {
                let client = Arc::new(client);
                // The previous client, if any, is asked to close before the
                // replacement becomes reachable.
                if let Some(previous) = node.take_client() {
                    if let Err(error) = previous.close().await {
                        warn!(url = %node.url, "failed to close replaced client: {error:#}");
                    }
                }
                // Install under the pool lock so a connect that races
                // close() either becomes visible to its teardown loop or is
                // not installed at all.
                let installed = {
                    let closed = self.inner.closed.read();
                    if *closed {
                        false
                    } else {
                        node.install_client(client.clone());
                        true
                    }
                };
                if !installed {
                    if let Err(error) = client.close().await {
                        warn!(url = %node.url, "failed to close discarded client: {error:#}");
                    }
                    node.abort_connect();
                    return;
                }
                info!(url = %node.url, "node connected");
                self.spawn_watcher(node, client);
            }
            Err(source) => {
                if self.inner.cancel.is_cancelled() {
                    // The attempt was aborted by shutdown, not refused by the
                    // node; don't count it against the node.
                    node.abort_connect();
                    return;
                }
                let error = anyhow::Error::new(Error::ConnectFailed {
                    url: node.url.clone(),
                    source,
                });
                warn!("{error:#}");
                node.fail_connect();
                self.schedule_reconnect(node);
            }
        }
    }

    /// Arm a one-shot timer that re-invokes the connector after the reconnect
    /// interval, unless the pool shuts down first.
    fn schedule_reconnect(&self, node: Arc<Node<T::Client>>) {
        let pool = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = pool.inner.cancel.cancelled() => {}
                _ = tokio::time::sleep(pool.inner.config.reconnect_interval()) => {
                    pool.spawn_connector(node);
                }
            }
        });
    }

    fn spawn_watcher(&self, node: Arc<Node<T::Client>>, client: Arc<T::Client>) {
        let pool = self.clone();
        tokio::spawn(async move { pool.watch_node(node, client).await });
    }

    /// Watch one specific client. Exits when the pool shuts down, when the
    /// client is replaced by a newer one (the new watcher takes over), or
    /// after handing a dead client off to the connector.
    async fn watch_node(self, node: Arc<Node<T::Client>>, client: Arc<T::Client>) {
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(WATCH_INTERVAL) => {}
            }

            if !node.holds_client(&client) {
                return;
            }
            if !client.is_connected() {
                node.mark_unhealthy();
                warn!(url = %node.url, "node connection lost");
                self.spawn_connector(node);
                return;
            }
        }
    }

    pub(crate) fn spawn_prober(&self) {
        let pool = self.clone();
        tokio::spawn(async move { pool.probe_loop().await });
    }

    /// The safety net above the watchers: every `health_check_interval`,
    /// re-check each node and repair whatever the watchers missed.
    async fn probe_loop(self) {
        let interval = self.inner.config.health_check_interval();
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }

            debug!("running health probe on all nodes");
            for node in &self.inner.nodes {
                let pool = self.clone();
                let node = node.clone();
                tokio::spawn(async move { pool.probe_node(node) });
            }
        }
    }

    fn probe_node(&self, node: Arc<Node<T::Client>>) {
        let needs_connector = {
            let mut inner = node.inner.write();
            match &inner.client {
                None => {
                    inner.healthy = false;
                    true
                }
                Some(client) if !client.is_connected() => {
                    inner.healthy = false;
                    true
                }
                Some(_) => {
                    if !inner.healthy {
                        inner.healthy = true;
                        info!(url = %node.url, "node is healthy again");
                    }
                    false
                }
            }
        };

        if needs_connector {
            debug!(url = %node.url, "node has no live connection");
            self.spawn_connector(node);
        }
    }
}
