//! The error types returned by [`Pool`](crate::Pool) operations.

/// Error returned by [`Pool`](crate::Pool) operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The operation was attempted after [`Pool::close`](crate::Pool::close).
    #[error("pool is closed")]
    PoolClosed,
    /// No node currently holds a live connection.
    ///
    /// The pool keeps reconnecting in the background; retrying after a short
    /// delay is the expected caller behaviour.
    #[error("no healthy nodes available")]
    NoHealthyNodes,
    /// [`Pool::set_node_weight`](crate::Pool::set_node_weight) was given a URL
    /// that is not part of the pool.
    #[error("node not found: {0}")]
    NodeNotFound(String),
    /// A background connect attempt failed.
    ///
    /// This variant never reaches callers of `get_client`; it is logged and
    /// counted against the node before the next attempt is scheduled.
    #[error("failed to connect to node {url}")]
    ConnectFailed {
        url: String,
        #[source]
        source: anyhow::Error,
    },
    /// One or more node clients failed to shut down cleanly during
    /// [`Pool::close`](crate::Pool::close). Carries every failure, keyed by
    /// node URL.
    #[error("errors while closing the pool: {}", format_close_errors(.0))]
    CloseFailure(Vec<(String, anyhow::Error)>),
}

fn format_close_errors(errors: &[(String, anyhow::Error)]) -> String {
    errors
        .iter()
        .map(|(url, error)| format!("{url}: {error:#}"))
        .collect::<Vec<_>>()
        .join("; ")
}
