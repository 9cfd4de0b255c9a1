use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::messaging::endpoint::Endpoint;
use crate::messaging::transport::{Connector, Transport};

enum FakeFrame {
    Data(Bytes),
    Close,
    Fail(String),
}

#[derive(Default)]
struct FakeLinkState {
    received: RwLock<Vec<Bytes>>,
    num_pings: AtomicUsize,
    num_ping_attempts: AtomicUsize,
    fail_pings: AtomicBool,
    fail_sends: AtomicBool,
    closed: AtomicBool,
}

/// The server side of an in-memory connection: it pushes frames to the client and records what
///  the client sent.
///
/// The connection is closed in an orderly fashion once its connector and all handles of the
///  [FakeServer] are dropped.
#[derive(Clone)]
pub struct FakeServer {
    state: Arc<FakeLinkState>,
    inbound: mpsc::UnboundedSender<FakeFrame>,
}
impl FakeServer {
    pub fn send_frame(&self, frame: impl Into<String>) {
        let frame: String = frame.into();
        let _ = self.inbound.send(FakeFrame::Data(frame.into()));
    }

    pub fn close(&self) {
        let _ = self.inbound.send(FakeFrame::Close);
    }

    /// let the client's next receive fail with the given cause
    pub fn fail(&self, cause: &str) {
        let _ = self.inbound.send(FakeFrame::Fail(cause.to_string()));
    }

    pub fn set_fail_pings(&self, fail: bool) {
        self.state.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// successful pings
    pub fn num_pings(&self) -> usize {
        self.state.num_pings.load(Ordering::SeqCst)
    }

    /// pings the client tried to send, including failed ones
    pub fn num_ping_attempts(&self) -> usize {
        self.state.num_ping_attempts.load(Ordering::SeqCst)
    }

    /// true once the client closed the connection
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// returns the commands received so far as JSON values, clearing the internal buffer
    pub async fn take_received_commands(&self) -> Vec<serde_json::Value> {
        let mut lock = self.state.received.write().await;
        std::mem::take(&mut *lock)
            .iter()
            .map(|frame| serde_json::from_slice(frame)
                .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(frame).to_string())))
            .collect()
    }
}

pub struct FakeTransport {
    state: Arc<FakeLinkState>,
    inbound: Mutex<mpsc::UnboundedReceiver<FakeFrame>>,
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("connection is closed"));
        }
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated send failure"));
        }
        self.state.received.write().await.push(payload);
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.state.num_ping_attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("connection is closed"));
        }
        if self.state.fail_pings.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated ping failure"));
        }
        self.state.num_pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recv(&self) -> anyhow::Result<Option<Bytes>> {
        match self.inbound.lock().await.recv().await {
            Some(FakeFrame::Data(frame)) => Ok(Some(frame)),
            Some(FakeFrame::Fail(cause)) => Err(anyhow!(cause)),
            Some(FakeFrame::Close) | None => Ok(None),
        }
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// A [Connector] for in-memory connections. Every successful `connect` creates a new [FakeServer]
///  that stays reachable through the connector for inspection.
#[derive(Default)]
pub struct FakeConnector {
    servers: RwLock<Vec<FakeServer>>,
    endpoints: RwLock<Vec<Endpoint>>,
    refusal: RwLock<Option<String>>,
    fail_pings: AtomicBool,
}
impl FakeConnector {
    pub fn new() -> Arc<FakeConnector> {
        Default::default()
    }

    /// refuse all further connection attempts with the given cause, or accept them again for `None`
    pub async fn refuse_connections(&self, cause: Option<&str>) {
        *self.refusal.write().await = cause.map(|c| c.to_string());
    }

    /// let pings fail on all connections created from now on
    pub fn fail_pings(&self, fail: bool) {
        self.fail_pings.store(fail, Ordering::SeqCst);
    }

    pub async fn servers(&self) -> Vec<FakeServer> {
        self.servers.read().await.clone()
    }

    pub async fn latest_server(&self) -> Option<FakeServer> {
        self.servers.read().await.last().cloned()
    }

    /// all endpoints for which a connection was attempted, in order
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.read().await.clone()
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<Arc<dyn Transport>> {
        self.endpoints.write().await.push(endpoint.clone());

        if let Some(cause) = self.refusal.read().await.as_ref() {
            return Err(anyhow!("{:?}: {}", endpoint, cause));
        }

        let state = Arc::new(FakeLinkState::default());
        state.fail_pings.store(self.fail_pings.load(Ordering::SeqCst), Ordering::SeqCst);

        let (inbound_sender, inbound_receiver) = mpsc::unbounded_channel();
        self.servers.write().await.push(FakeServer {
            state: state.clone(),
            inbound: inbound_sender,
        });

        Ok(Arc::new(FakeTransport {
            state,
            inbound: Mutex::new(inbound_receiver),
        }))
    }
}
