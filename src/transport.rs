//! The capability traits the pool core is built against, and their AMQP
//! implementation.
//!
//! [`Pool`](crate::Pool) never touches `lapin` directly: it supervises
//! anything that can play the role of a single-connection client. This keeps
//! the supervision logic independent of the wire protocol and lets tests
//! drive the pool with in-memory fakes.

use crate::client::{Client, ClientError};
use crate::configuration::{ClientConfig, PoolConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A single-connection client, as seen by the pool.
///
/// The pool only needs to know whether the transport underneath a client is
/// still open and how to tear it down; everything else (publishing, topology
/// declaration) is between the application and the client itself.
#[async_trait::async_trait]
pub trait NodeClient: Send + Sync + 'static {
    /// True iff the underlying connection exists and reports itself open.
    ///
    /// Must not perform I/O: this is called synchronously on every selection.
    fn is_connected(&self) -> bool;

    /// Tear the client down. Must be idempotent.
    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// Builds a connected [`NodeClient`] for a broker URL.
///
/// Invoked by the pool's per-node connector every time a node needs a fresh
/// connection. The `cancel` token is the pool's shutdown signal: in-flight
/// connection establishment must abort promptly once it fires.
#[async_trait::async_trait]
pub trait NodeConnector: Send + Sync + 'static {
    type Client: NodeClient;

    async fn connect(
        &self,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<Self::Client, anyhow::Error>;
}

/// Any shared connector is itself a connector: lets callers hand a [`Pool`](crate::Pool)
/// an `Arc`-wrapped connector whose other handle they keep for themselves.
#[async_trait::async_trait]
impl<C: NodeConnector> NodeConnector for Arc<C> {
    type Client = C::Client;

    async fn connect(
        &self,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<Self::Client, anyhow::Error> {
        (**self).connect(url, cancel).await
    }
}

/// The production [`NodeConnector`]: dials RabbitMQ via [`Client`].
pub struct AmqpConnector {
    reconnect_interval_seconds: Option<u64>,
    max_reconnect_attempts: Option<u32>,
}

impl AmqpConnector {
    /// Build a connector carrying the retry settings from a pool configuration.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            reconnect_interval_seconds: config.reconnect_interval_seconds,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

#[async_trait::async_trait]
impl NodeConnector for AmqpConnector {
    type Client = Client;

    async fn connect(
        &self,
        url: &str,
        cancel: CancellationToken,
    ) -> Result<Client, anyhow::Error> {
        let client = Client::new(ClientConfig {
            url: url.to_owned(),
            reconnect_interval_seconds: self.reconnect_interval_seconds,
            max_reconnect_attempts: self.max_reconnect_attempts,
        });
        match client.connect(cancel).await {
            Ok(()) => Ok(client),
            // The façade's exhausted-retry error repeats the URL this
            // connector was just given; unwrap it so the pool's own wrapping
            // names the node exactly once.
            Err(ClientError::ConnectFailed {
                attempts, source, ..
            }) => Err(anyhow::Error::new(*source)
                .context(format!("gave up after {attempts} attempt(s)"))),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait::async_trait]
impl NodeClient for Client {
    fn is_connected(&self) -> bool {
        Client::is_connected(self)
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        Client::close(self).await.map_err(Into::into)
    }
}
