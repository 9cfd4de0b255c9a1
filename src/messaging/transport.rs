pub mod ws;

use std::sync::Arc;

use bytes::Bytes;
#[cfg(test)] use mockall::automock;

use crate::messaging::endpoint::Endpoint;

/// A single open, message-oriented connection. Frames are opaque payloads at this level, keep-alive
///  and close handshakes are the transport's business.
///
/// Sending and receiving are independent of each other and may happen concurrently. Concurrent
///  sends are written in the order in which they were issued.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Transport: Sync + Send {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()>;

    /// transport-level liveness probe
    async fn ping(&self) -> anyhow::Result<()>;

    /// Wait for the next data frame. `Ok(None)` signals that the peer closed the connection in an
    ///  orderly fashion; an error means the connection is broken. Neither is recoverable.
    async fn recv(&self) -> anyhow::Result<Option<Bytes>>;

    /// Close the connection. This is best effort and never fails; it may be called more than once.
    async fn close(&self);
}

/// This trait decouples establishing connections (different strategies, real or in-memory) from
///  the session logic that drives them.
#[async_trait::async_trait]
pub trait Connector: Sync + Send {
    /// Establish a connection, returning once the handshake completed
    async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<Arc<dyn Transport>>;
}
