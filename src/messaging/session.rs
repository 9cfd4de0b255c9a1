use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::select;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::controller::controller_config::ControllerConfig;
use crate::messaging::codec::{self, Command, ServerEvent};
use crate::messaging::endpoint::Endpoint;
use crate::messaging::transport::{Connector, Transport};

/// A [Session] owns at most one connection to the server at a time.
///
/// While a connection is open, two background loops run for it: a keep-alive loop pinging the
///  server at a fixed interval, and a receive loop decoding inbound frames. Both report to the
///  consumer through a single ordered stream of [ServerEvent]s that is returned by
///  [Session::connect]. The stream ends when the connection ends, either by an explicit
///  [Session::disconnect] or because the transport failed or was closed by the server - in the
///  latter cases, the last event is [ServerEvent::Error] or [ServerEvent::Disconnected]
///  respectively.
///
/// Decoding failures affect only the frame in question, and a failed ping is reported but does
///  not end the connection: only the receive side decides when a connection is gone.
///
/// There is no automatic reconnect: that is the caller's decision.
pub struct Session {
    config: Arc<ControllerConfig>,
    connector: Arc<dyn Connector>,
    active: Mutex<Option<ActiveConnection>>,
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session{{ping_interval:{:?}}}", &self.config.ping_interval)
    }
}

struct ActiveConnection {
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    cancel_sender: broadcast::Sender<()>,
    /// owns the keep-alive loop, see [run_receive_loop]
    receive_loop: JoinHandle<()>,
}

impl ActiveConnection {
    async fn shutdown(self) {
        debug!(endpoint = ?self.endpoint, "shutting down connection");

        // NB: every await point in both loops also listens for cancellation, so no events are
        //      published after this point, even if the consumer stopped reading
        let _ = self.cancel_sender.send(());
        self.transport.close().await;

        if let Err(e) = self.receive_loop.await {
            error!("connection loop terminated abnormally: {}", e);
        }
    }
}

impl Session {
    pub fn new(config: Arc<ControllerConfig>, connector: Arc<dyn Connector>) -> Session {
        Session {
            config,
            connector,
            active: Default::default(),
        }
    }

    /// Open a connection, closing a previously open connection first. Returns once the handshake
    ///  completed, or with an error if it failed.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self, endpoint: &Endpoint) -> anyhow::Result<mpsc::Receiver<ServerEvent>> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            debug!("closing the previous connection before opening a new one");
            previous.shutdown().await;
        }

        info!("connecting");
        let transport = self.connector.connect(endpoint).await?;
        info!("connected");

        let (event_sender, event_receiver) = mpsc::channel(self.config.event_queue_capacity);
        let (cancel_sender, _) = broadcast::channel(1);

        let keep_alive_loop = tokio::spawn(run_keep_alive_loop(
            transport.clone(),
            self.config.ping_interval,
            event_sender.clone(),
            cancel_sender.subscribe(),
        ));
        let receive_loop = tokio::spawn(run_receive_loop(
            transport.clone(),
            event_sender,
            keep_alive_loop,
            cancel_sender.subscribe(),
        ));

        *active = Some(ActiveConnection {
            endpoint: endpoint.clone(),
            transport,
            cancel_sender,
            receive_loop,
        });
        Ok(event_receiver)
    }

    /// Close the current connection, ending its event stream. Calling this without an open
    ///  connection does nothing.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(connection) => connection.shutdown().await,
            None => debug!("disconnect without an open connection - ignoring"),
        }
    }

    /// Send a single command without waiting for any kind of response.
    pub async fn send(&self, command: &Command) -> anyhow::Result<()> {
        let transport = match self.active.lock().await.as_ref() {
            Some(active) => active.transport.clone(),
            None => return Err(anyhow!("cannot send {:?}: not connected", command)),
        };

        let payload = codec::encode(command)?;
        trace!(?command, "sending command");
        transport.send(payload).await
    }

    /// true while a connection is open and its receive loop is running
    pub async fn is_open(&self) -> bool {
        self.active.lock().await
            .as_ref()
            .is_some_and(|active| !active.receive_loop.is_finished())
    }
}

async fn run_keep_alive_loop(transport: Arc<dyn Transport>, interval: Duration, events: mpsc::Sender<ServerEvent>, mut cancel: broadcast::Receiver<()>) {
    let mut ticks = time::interval(interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            biased;
            _ = cancel.recv() => break,
            _ = ticks.tick() => {}
        }

        let ping_result = select! {
            biased;
            _ = cancel.recv() => break,
            r = transport.ping() => r,
        };

        match ping_result {
            Ok(()) => trace!("ping"),
            Err(e) => {
                warn!("keep-alive ping failed: {:#}", e);
                select! {
                    biased;
                    _ = cancel.recv() => break,
                    r = events.send(ServerEvent::Error(Arc::new(e))) => {
                        if r.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("keep-alive loop terminated");
}

/// The receive loop owns the keep-alive loop and stops it when the connection ends, so that the
///  final event is guaranteed to be the last one.
async fn run_receive_loop(transport: Arc<dyn Transport>, events: mpsc::Sender<ServerEvent>, keep_alive_loop: JoinHandle<()>, mut cancel: broadcast::Receiver<()>) {
    let final_event = receive_frames(transport.as_ref(), &events, &mut cancel).await;

    // the connection is gone, so there is nothing left to keep alive
    keep_alive_loop.abort();
    match keep_alive_loop.await {
        Err(e) if !e.is_cancelled() => error!("keep-alive loop terminated abnormally: {}", e),
        _ => {}
    }

    if let Some(event) = final_event {
        select! {
            biased;
            _ = cancel.recv() => debug!("cancelled before the final event was delivered"),
            _ = events.send(event) => {}
        }
    }
    debug!("receive loop terminated");
}

/// Returns the event that ends the stream, or `None` if the loop was cancelled or the consumer
///  went away.
async fn receive_frames(transport: &dyn Transport, events: &mpsc::Sender<ServerEvent>, cancel: &mut broadcast::Receiver<()>) -> Option<ServerEvent> {
    loop {
        let frame = select! {
            biased;
            _ = cancel.recv() => {
                debug!("receive loop cancelled");
                return None;
            }
            r = transport.recv() => r,
        };

        match frame {
            Ok(Some(frame)) => {
                match codec::decode(&frame) {
                    Ok(event) => {
                        trace!(?event, "received");
                        select! {
                            biased;
                            _ = cancel.recv() => {
                                debug!("receive loop cancelled");
                                return None;
                            }
                            r = events.send(event) => {
                                if r.is_err() {
                                    debug!("event consumer went away - stopping the receive loop");
                                    return None;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!("dropping a frame that could not be decoded: {:#}", e);
                    }
                }
            }
            Ok(None) => {
                info!("connection closed by the server");
                return Some(ServerEvent::Disconnected);
            }
            Err(e) => {
                error!("connection failed: {:#}", e);
                return Some(ServerEvent::Error(Arc::new(e)));
            }
        }
    }
}


#[cfg(test)]
mod test {
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;
    use tokio::sync::Mutex;

    use crate::messaging::transport::MockTransport;
    use crate::test_util::frames::{initial_data_frame, update_frame};
    use crate::test_util::transport::FakeConnector;
    use super::*;

    fn session(connector: Arc<dyn Connector>) -> Session {
        Session::new(Arc::new(ControllerConfig::new()), connector)
    }

    fn session_with_queue_capacity(connector: Arc<dyn Connector>, event_queue_capacity: usize) -> Session {
        let mut config = ControllerConfig::new();
        config.event_queue_capacity = event_queue_capacity;
        Session::new(Arc::new(config), connector)
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("localhost", 8765)
    }

    async fn next_event(events: &mut mpsc::Receiver<ServerEvent>) -> Option<ServerEvent> {
        time::timeout(Duration::from_secs(5), events.recv()).await
            .expect("timed out waiting for an event")
    }

    /// hands out a single, pre-built transport
    struct SingleTransportConnector {
        transport: Mutex<Option<Arc<dyn Transport>>>,
    }

    #[async_trait::async_trait]
    impl Connector for SingleTransportConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> anyhow::Result<Arc<dyn Transport>> {
            self.transport.lock().await
                .take()
                .ok_or_else(|| anyhow!("no transport left"))
        }
    }

    #[tokio::test]
    async fn test_events_in_arrival_order() {
        let connector = FakeConnector::new();
        let session = session(connector.clone());

        let mut events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        server.send_frame(initial_data_frame(&[(2, true), (1, false)]));
        server.send_frame(update_frame(&[("1", 1)]));
        server.send_frame(update_frame(&[("2", 0)]));

        match next_event(&mut events).await {
            Some(ServerEvent::InitialData(players)) => {
                assert_eq!(players.iter().map(|p| (p.number, p.is_alive)).collect::<Vec<_>>(), vec![(1, false), (2, true)]);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match next_event(&mut events).await {
            Some(ServerEvent::Update(alive)) => assert_eq!(alive.get(&1), Some(&true)),
            other => panic!("unexpected event {:?}", other),
        }
        match next_event(&mut events).await {
            Some(ServerEvent::Update(alive)) => assert_eq!(alive.get(&2), Some(&false)),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let connector = FakeConnector::new();
        let session = session(connector.clone());

        let mut events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        server.send_frame("this is not json");
        server.send_frame(r#"{"type":"unknown"}"#);
        server.send_frame(update_frame(&[("5", 0)]));

        match next_event(&mut events).await {
            Some(ServerEvent::Update(alive)) => assert_eq!(alive.get(&5), Some(&false)),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(session.is_open().await);
    }

    #[tokio::test]
    async fn test_orderly_close_by_server() {
        let connector = FakeConnector::new();
        let session = session(connector.clone());

        let mut events = session.connect(&endpoint()).await.unwrap();
        connector.latest_server().await.unwrap().close();

        assert!(matches!(next_event(&mut events).await, Some(ServerEvent::Disconnected)));
        assert!(next_event(&mut events).await.is_none());
        assert!(!session.is_open().await);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let connector = FakeConnector::new();
        let session = session(connector.clone());

        let mut events = session.connect(&endpoint()).await.unwrap();
        connector.latest_server().await.unwrap().fail("connection reset by peer");

        match next_event(&mut events).await {
            Some(ServerEvent::Error(e)) => assert!(e.to_string().contains("connection reset by peer")),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(next_event(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn test_handshake_failure() {
        let connector = FakeConnector::new();
        connector.refuse_connections(Some("connection refused")).await;
        let session = session(connector.clone());

        let result = session.connect(&endpoint()).await;
        assert!(result.is_err());
        assert!(!session.is_open().await);
        assert!(session.send(&Command::Arm).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream_and_is_idempotent() {
        let connector = FakeConnector::new();
        let session = session(connector.clone());

        let mut events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        session.disconnect().await;
        assert!(next_event(&mut events).await.is_none());
        assert!(server.is_closed());
        assert!(!session.is_open().await);

        session.disconnect().await;
        assert!(!session.is_open().await);
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let session = session(FakeConnector::new());
        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_open().await);
    }

    #[tokio::test]
    async fn test_connect_closes_previous_connection() {
        let connector = FakeConnector::new();
        let session = session(connector.clone());

        let mut first_events = session.connect(&endpoint()).await.unwrap();
        let first_server = connector.latest_server().await.unwrap();

        let _second_events = session.connect(&Endpoint::new("10.1.2.3", 9000)).await.unwrap();
        let second_server = connector.latest_server().await.unwrap();

        assert!(next_event(&mut first_events).await.is_none());
        assert!(first_server.is_closed());
        assert!(!second_server.is_closed());
        assert_eq!(connector.endpoints().await, vec![endpoint(), Endpoint::new("10.1.2.3", 9000)]);

        session.send(&Command::Disarm).await.unwrap();
        assert!(first_server.take_received_commands().await.is_empty());
        assert_eq!(second_server.take_received_commands().await, vec![json!({"action": "disarm"})]);
    }

    #[tokio::test]
    async fn test_send_in_call_order() {
        let connector = FakeConnector::new();
        let session = session(connector.clone());

        let _events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        session.send(&Command::Arm).await.unwrap();
        session.send(&Command::Eliminate { numbers: vec![4, 5] }).await.unwrap();
        session.send(&Command::Revive { numbers: vec![6] }).await.unwrap();
        session.send(&Command::Disarm).await.unwrap();

        assert_eq!(server.take_received_commands().await, vec![
            json!({"action": "arm"}),
            json!({"action": "eliminate", "numbers": [4, 5]}),
            json!({"action": "revive", "numbers": [6]}),
            json!({"action": "disarm"}),
        ]);
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let session = session(FakeConnector::new());
        assert!(session.send(&Command::Arm).await.is_err());
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let mut transport = MockTransport::new();
        transport.expect_send()
            .withf(|payload: &Bytes| payload.as_ref() == br#"{"action":"arm"}"#)
            .times(1)
            .returning(|_| Err(anyhow!("broken pipe")));
        transport.expect_ping()
            .returning(|| Ok(()));
        transport.expect_recv()
            .returning(|| Err(anyhow!("connection reset")));
        transport.expect_close()
            .returning(|| ());

        let transport: Arc<dyn Transport> = Arc::new(transport);
        let connector = Arc::new(SingleTransportConnector { transport: Mutex::new(Some(transport)) });
        let session = session(connector);

        let _events = session.connect(&endpoint()).await.unwrap();
        assert!(session.send(&Command::Arm).await.is_err());

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_ping_failure_is_reported_but_not_fatal() {
        let connector = FakeConnector::new();
        connector.fail_pings(true);
        let session = session(connector.clone());

        let mut events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        // the first ping is sent right away
        assert!(matches!(next_event(&mut events).await, Some(ServerEvent::Error(_))));

        server.send_frame(update_frame(&[("1", 0)]));
        assert!(matches!(next_event(&mut events).await, Some(ServerEvent::Update(_))));
        assert!(session.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_interval() {
        let connector = FakeConnector::new();
        let session = session(connector.clone());

        let _events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        // pings at 0s, 2s and 4s
        time::sleep(Duration::from_millis(4100)).await;
        assert_eq!(server.num_pings(), 3);

        session.disconnect().await;
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(server.num_pings(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_with_full_event_queue() {
        let connector = FakeConnector::new();
        let session = session_with_queue_capacity(connector.clone(), 1);

        let mut events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        // the update fills the queue, so the final event can not be delivered
        server.send_frame(update_frame(&[("1", 0)]));
        server.close();
        time::sleep(Duration::from_millis(100)).await;

        time::timeout(Duration::from_secs(3), session.disconnect()).await
            .expect("disconnect must not wait for the consumer");

        assert!(matches!(next_event(&mut events).await, Some(ServerEvent::Update(_))));
        assert!(next_event(&mut events).await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_with_full_event_queue_while_receiving() {
        let connector = FakeConnector::new();
        let session = session_with_queue_capacity(connector.clone(), 1);

        let _events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        server.send_frame(update_frame(&[("1", 0)]));
        server.send_frame(update_frame(&[("2", 0)]));
        time::sleep(Duration::from_millis(100)).await;

        time::timeout(Duration::from_secs(3), session.disconnect()).await
            .expect("disconnect must not wait for the consumer");
        assert!(!session.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_continues_after_ping_failures() {
        let connector = FakeConnector::new();
        connector.fail_pings(true);
        let session = session(connector.clone());

        let mut events = session.connect(&endpoint()).await.unwrap();
        let server = connector.latest_server().await.unwrap();

        // attempts at 0s, 2s and 4s, each reported separately
        time::sleep(Duration::from_millis(4100)).await;
        assert_eq!(server.num_ping_attempts(), 3);
        assert_eq!(server.num_pings(), 0);
        for _ in 0..3 {
            assert!(matches!(events.try_recv(), Ok(ServerEvent::Error(_))));
        }
        assert!(events.try_recv().is_err());

        server.set_fail_pings(false);
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(server.num_ping_attempts(), 4);
        assert_eq!(server.num_pings(), 1);
        assert!(events.try_recv().is_err());
        assert!(session.is_open().await);
    }
}
