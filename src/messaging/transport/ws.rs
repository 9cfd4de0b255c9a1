use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::CONTENT_TYPE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::messaging::endpoint::Endpoint;
use crate::messaging::transport::{Connector, Transport};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens plain (`ws://`) WebSocket connections
#[derive(Debug, Default)]
pub struct WsConnector {}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<Arc<dyn Transport>> {
        let mut request = endpoint.url()
            .into_client_request()
            .with_context(|| format!("invalid server address {:?}", endpoint))?;
        request.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let (ws, response) = connect_async(request).await
            .with_context(|| format!("connecting to {:?}", endpoint))?;
        debug!(?endpoint, status = ?response.status(), "websocket handshake completed");

        let (sink, stream) = ws.split();
        Ok(Arc::new(WsTransport {
            endpoint: endpoint.clone(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }))
    }
}

/// The sink and the stream halves are locked separately so that sending never waits for a pending
///  receive. The sink lock is fair, which keeps concurrent sends in call order.
pub struct WsTransport {
    endpoint: Endpoint,
    sink: Mutex<SplitSink<Ws, Message>>,
    stream: Mutex<SplitStream<Ws>>,
}

impl Debug for WsTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "WsTransport{{endpoint:{:?}}}", &self.endpoint)
    }
}

#[async_trait::async_trait]
impl Transport for WsTransport {
    async fn send(&self, payload: Bytes) -> anyhow::Result<()> {
        self.sink.lock().await
            .send(Message::Binary(payload.into())).await
            .context("sending websocket frame")?;
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.sink.lock().await
            .send(Message::Ping(Default::default())).await
            .context("sending websocket ping")?;
        Ok(())
    }

    async fn recv(&self) -> anyhow::Result<Option<Bytes>> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::copy_from_slice(text.as_bytes()))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(Bytes::from(data))),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed the connection");
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    // pings are answered by tungstenite itself, pongs are just proof of life
                    trace!("ignoring control frame {:?}", other);
                }
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(e).context("receiving websocket frame"),
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("error closing websocket connection (already closed?): {}", e);
        }
    }
}
