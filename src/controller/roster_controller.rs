use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::controller::connection_state::ConnectionState;
use crate::controller::controller_config::{ControllerConfig, SettingsProvider};
use crate::controller::controller_state::{ControllerState, RosterSnapshot};
use crate::messaging::codec::{Command, ServerEvent};
use crate::messaging::endpoint::Endpoint;
use crate::messaging::session::Session;
use crate::messaging::transport::ws::WsConnector;
use crate::messaging::transport::Connector;
use crate::roster::player::Player;

/// This is the API for applications: it keeps a local roster in sync with the server, and it
///  turns user intent into commands.
///
/// Server events are applied by a background task one at a time and in arrival order. User
///  intent is applied to the local roster optimistically, i.e. before the server confirms it, and
///  a later server update for the same player simply overwrites it. Nothing is rolled back if
///  sending fails.
///
/// Readers observe the state through [RosterSnapshot]s, either on demand or by subscribing to
///  changes.
pub struct RosterController {
    config: Arc<ControllerConfig>,
    settings: Arc<dyn SettingsProvider>,
    session: Session,
    state: Arc<RwLock<ControllerState>>,
    snapshots: watch::Receiver<RosterSnapshot>,
    /// the task applying the current connection's events. The lock also serializes connecting
    ///  and disconnecting.
    consumer: Mutex<Option<JoinHandle<()>>>,
    /// held while applying user intent and sending the resulting commands, so that commands go out
    ///  in the order in which the roster was changed
    outbound: Mutex<()>,
}

impl Debug for RosterController {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RosterController{{session:{:?}}}", &self.session)
    }
}

impl RosterController {
    pub fn new(config: Arc<ControllerConfig>, settings: Arc<dyn SettingsProvider>, connector: Arc<dyn Connector>) -> RosterController {
        let state = ControllerState::new(Player::default_players(config.default_player_count));
        let snapshots = state.subscribe();

        RosterController {
            session: Session::new(config.clone(), connector),
            config,
            settings,
            state: Arc::new(RwLock::new(state)),
            snapshots,
            consumer: Default::default(),
            outbound: Default::default(),
        }
    }

    /// A controller talking to the server over WebSockets
    pub fn with_websockets(config: Arc<ControllerConfig>, settings: Arc<dyn SettingsProvider>) -> RosterController {
        RosterController::new(config, settings, Arc::new(WsConnector::default()))
    }

    /// Connect to the server configured in the settings, disconnecting first if there is a
    ///  connection. The roster is cleared and filled by the server's initial data.
    ///
    /// A failed handshake leaves the controller in [ConnectionState::Error], and is also returned.
    pub async fn connect(&self) -> anyhow::Result<()> {
        let mut consumer = self.consumer.lock().await;
        self.shutdown(&mut consumer).await;

        let endpoint = Endpoint::from_settings(self.settings.as_ref(), &self.config);
        info!(?endpoint, "connecting to server");
        {
            let mut state = self.state.write().await;
            state.clear_roster();
            state.set_connection(ConnectionState::Connecting);
        }

        match self.session.connect(&endpoint).await {
            Ok(events) => {
                // NB: the state is 'connected' before the first event is applied
                self.state.write().await.set_connection(ConnectionState::Connected);
                *consumer = Some(tokio::spawn(consume_events(events, self.state.clone())));
                Ok(())
            }
            Err(e) => {
                error!(?endpoint, "connection failed: {:#}", e);
                let message = format!("{:#}", e);
                self.state.write().await.set_connection(ConnectionState::Error(Arc::new(e)));
                Err(anyhow!(message))
            }
        }
    }

    /// Close the connection if there is one. This never fails and may be called any number of times.
    pub async fn disconnect(&self) {
        let mut consumer = self.consumer.lock().await;
        self.shutdown(&mut consumer).await;

        let mut state = self.state.write().await;
        if state.connection() != &ConnectionState::Disconnected {
            info!("disconnected");
            state.set_connection(ConnectionState::Disconnected);
        }
    }

    async fn shutdown(&self, consumer: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = consumer.take() {
            handle.abort();
            match handle.await {
                Err(e) if !e.is_cancelled() => error!("event consumer terminated abnormally: {}", e),
                _ => {}
            }
        }
        self.session.disconnect().await;
    }

    /// Flip the aliveness of all given players locally and tell the server: players passed in as
    ///  alive are eliminated, the others revived, with at most one command for each direction.
    ///
    /// The local change is kept even if sending fails. In that case, the remaining command is
    ///  still attempted, and the first failure is returned.
    pub async fn toggle_player_aliveness(&self, players: &[Player]) -> anyhow::Result<()> {
        let _outbound = self.outbound.lock().await;

        let batch = self.state.write().await.toggle(players);
        if batch.is_empty() {
            return Ok(());
        }
        debug!(?batch, "toggled players");

        let mut first_error = None;
        for command in batch.into_commands() {
            if let Err(e) = self.session.send(&command).await {
                error!("sending {:?} failed: {:#}", command, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn arm(&self) -> anyhow::Result<()> {
        self.send_command(Command::Arm).await
    }

    pub async fn disarm(&self) -> anyhow::Result<()> {
        self.send_command(Command::Disarm).await
    }

    async fn send_command(&self, command: Command) -> anyhow::Result<()> {
        let _outbound = self.outbound.lock().await;

        let result = self.session.send(&command).await;
        if let Err(e) = &result {
            error!("sending {:?} failed: {:#}", command, e);
        }
        result
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        self.snapshots.borrow().clone()
    }

    /// a receiver that is notified of every change
    pub fn subscribe(&self) -> watch::Receiver<RosterSnapshot> {
        self.snapshots.clone()
    }

    pub fn players(&self) -> Vec<Player> {
        self.snapshots.borrow().players.clone()
    }

    pub fn alive_players(&self) -> Vec<Player> {
        self.snapshots.borrow().alive_players()
    }

    pub fn eliminated_players(&self) -> Vec<Player> {
        self.snapshots.borrow().eliminated_players()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.snapshots.borrow().connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshots.borrow().is_connected()
    }
}

async fn consume_events(mut events: mpsc::Receiver<ServerEvent>, state: Arc<RwLock<ControllerState>>) {
    while let Some(event) = events.recv().await {
        state.write().await.apply(event);
    }

    // the session always ends a stream with a final event unless it was told to disconnect, and
    //  then this task is aborted before
    let mut state = state.write().await;
    if state.connection().is_connected() {
        error!("event stream ended without a final event");
        state.set_connection(ConnectionState::Error(Arc::new(anyhow!("event stream ended unexpectedly"))));
    }
    debug!("event consumer terminated");
}
