use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::controller::connection_state::ConnectionState;
use crate::messaging::codec::ServerEvent;
use crate::roster::player::{Player, PlayerNumber};
use crate::roster::roster::Roster;
use crate::roster::toggle_batch::ToggleBatch;

/// A consistent, immutable view of the controller's state as published after each mutation.
///  The version increases with every published change.
#[derive(Clone, Debug)]
pub struct RosterSnapshot {
    pub version: u64,
    pub players: Vec<Player>,
    pub connection: ConnectionState,
}

impl RosterSnapshot {
    pub fn alive_players(&self) -> Vec<Player> {
        self.players.iter()
            .filter(|p| p.is_alive)
            .cloned()
            .collect()
    }

    pub fn eliminated_players(&self) -> Vec<Player> {
        self.players.iter()
            .filter(|p| !p.is_alive)
            .cloned()
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// The players with the given numbers in the given order. Numbers that are not in the roster
    ///  are skipped: their aliveness is unknown.
    pub fn players_by_number(&self, numbers: &[PlayerNumber]) -> Vec<Player> {
        numbers.iter()
            .filter_map(|&n| self.players.binary_search_by_key(&n, |p| p.number).ok())
            .map(|idx| self.players[idx])
            .collect()
    }
}

/// The roster and connection state owned by a controller. All mutation goes through `&mut self`,
///  the controller serializes access, and every mutation publishes a fresh [RosterSnapshot] so
///  that readers never see partially applied changes.
pub struct ControllerState {
    roster: Roster,
    connection: ConnectionState,
    version: u64,
    snapshots: watch::Sender<RosterSnapshot>,
}

impl ControllerState {
    pub fn new(initial_players: Vec<Player>) -> ControllerState {
        let roster = Roster::from_players(initial_players);
        let (snapshots, _) = watch::channel(RosterSnapshot {
            version: 0,
            players: roster.players().to_vec(),
            connection: ConnectionState::Disconnected,
        });

        ControllerState {
            roster,
            connection: ConnectionState::Disconnected,
            version: 0,
            snapshots,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RosterSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn set_connection(&mut self, connection: ConnectionState) {
        debug!("connection state {:?} -> {:?}", self.connection, connection);
        self.connection = connection;
        self.publish();
    }

    pub fn clear_roster(&mut self) {
        self.roster.clear();
        self.publish();
    }

    /// Apply a single event from the session
    pub fn apply(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::InitialData(players) => {
                info!("received roster with {} players", players.len());
                self.roster.replace(players);
                self.on_data_received();
            }
            ServerEvent::Update(alive) => {
                let num_changed = self.roster.apply_update(&alive);
                debug!("update for {} players, {} changed", alive.len(), num_changed);
                self.on_data_received();
            }
            ServerEvent::Error(cause) => {
                warn!("connection error: {:#}", cause);
                self.connection = ConnectionState::Error(cause);
            }
            ServerEvent::Disconnected => {
                info!("disconnected by the server");
                self.connection = ConnectionState::Disconnected;
            }
        }
        self.publish();
    }

    /// Data arriving proves the connection works, even if a keep-alive ping failed before
    fn on_data_received(&mut self) {
        if self.connection.is_error() {
            debug!("receiving data again after an error - connection is alive");
            self.connection = ConnectionState::Connected;
        }
    }

    /// Flip the aliveness of the given players locally, returning the batch of commands that
    ///  tells the server about it.
    ///
    /// The aliveness passed in for each player decides the direction of the transition: it is
    ///  what the user saw when asking for the change. The roster entry is flipped if there is one.
    ///  A player occurring more than once is handled once per occurrence.
    pub fn toggle(&mut self, players: &[Player]) -> ToggleBatch {
        let mut batch = ToggleBatch::default();
        let mut num_flipped = 0;

        for player in players {
            batch.add(player.number, player.is_alive);

            match self.roster.toggle(player.number) {
                Some(was_alive) => {
                    if was_alive != player.is_alive {
                        debug!("toggling player {} based on stale aliveness {}", player.number, player.is_alive);
                    }
                    num_flipped += 1;
                }
                None => debug!("toggling player {} who is not in the roster - sending without local change", player.number),
            }
        }

        if num_flipped > 0 {
            self.publish();
        }
        batch
    }

    fn publish(&mut self) {
        self.version += 1;
        self.snapshots.send_replace(RosterSnapshot {
            version: self.version,
            players: self.roster.players().to_vec(),
            connection: self.connection.clone(),
        });
    }
}


#[cfg(test)]
mod test {
    use std::sync::Arc;

    use anyhow::anyhow;
    use rstest::rstest;

    use crate::roster::roster::AliveMap;
    use crate::test_util::frames::roster_pairs;
    use super::*;

    fn players(entries: &[(PlayerNumber, bool)]) -> Vec<Player> {
        entries.iter()
            .map(|&(n, a)| Player::new(n, a))
            .collect()
    }

    fn connected_state(entries: &[(PlayerNumber, bool)]) -> ControllerState {
        let mut state = ControllerState::new(players(entries));
        state.set_connection(ConnectionState::Connected);
        state
    }

    #[test]
    fn test_initial_snapshot() {
        let state = ControllerState::new(Player::default_players(456));
        let snapshot = state.snapshot();

        assert_eq!(snapshot.version, 0);
        assert_eq!(snapshot.players.len(), 456);
        assert_eq!(snapshot.alive_players().len(), 456);
        assert!(snapshot.eliminated_players().is_empty());
        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
    }

    #[test]
    fn test_initial_data_then_update() {
        let mut state = connected_state(&[]);

        state.apply(ServerEvent::InitialData(players(&[(1, true), (2, true), (3, false)])));
        assert_eq!(roster_pairs(&state.snapshot().players), vec![(1, true), (2, true), (3, false)]);

        state.apply(ServerEvent::Update([(2, false)].into_iter().collect::<AliveMap>()));
        let snapshot = state.snapshot();
        assert_eq!(roster_pairs(&snapshot.players), vec![(1, true), (2, false), (3, false)]);
        assert_eq!(roster_pairs(&snapshot.alive_players()), vec![(1, true)]);
        assert_eq!(roster_pairs(&snapshot.eliminated_players()), vec![(2, false), (3, false)]);
        assert!(snapshot.is_connected());
    }

    #[rstest]
    #[case::all_known(&[3, 1], vec![(3, false), (1, true)])]
    #[case::unknown_skipped(&[1, 99, 2], vec![(1, true), (2, true)])]
    #[case::none_known(&[42], vec![])]
    fn test_players_by_number(#[case] numbers: &[PlayerNumber], #[case] expected: Vec<(PlayerNumber, bool)>) {
        let state = connected_state(&[(1, true), (2, true), (3, false)]);
        assert_eq!(roster_pairs(&state.snapshot().players_by_number(numbers)), expected);
    }

    #[test]
    fn test_initial_data_replaces_roster() {
        let mut state = connected_state(&[(1, true), (2, true), (3, true)]);
        state.apply(ServerEvent::InitialData(players(&[(7, false)])));
        assert_eq!(roster_pairs(state.roster().players()), vec![(7, false)]);
    }

    #[test]
    fn test_error_keeps_roster() {
        let mut state = connected_state(&[(1, true), (2, false)]);
        state.apply(ServerEvent::Error(Arc::new(anyhow!("connection reset"))));

        let snapshot = state.snapshot();
        assert!(snapshot.connection.is_error());
        assert_eq!(roster_pairs(&snapshot.players), vec![(1, true), (2, false)]);
    }

    #[rstest]
    #[case::initial_data(ServerEvent::InitialData(vec![Player::new(1, false)]))]
    #[case::update(ServerEvent::Update([(1, false)].into_iter().collect()))]
    fn test_data_after_error_means_connected(#[case] event: ServerEvent) {
        let mut state = connected_state(&[(1, true)]);
        state.apply(ServerEvent::Error(Arc::new(anyhow!("ping failed"))));
        assert!(state.connection().is_error());

        state.apply(event);
        assert!(state.connection().is_connected());
        assert_eq!(roster_pairs(state.roster().players()), vec![(1, false)]);
    }

    #[test]
    fn test_disconnected_event() {
        let mut state = connected_state(&[(1, true)]);
        state.apply(ServerEvent::Disconnected);
        assert_eq!(state.snapshot().connection, ConnectionState::Disconnected);
        assert_eq!(state.roster().len(), 1);
    }

    #[test]
    fn test_every_mutation_publishes() {
        let mut state = connected_state(&[(1, true)]);
        let mut receiver = state.subscribe();
        let version = receiver.borrow_and_update().version;

        state.apply(ServerEvent::Update([(1, false)].into_iter().collect()));
        assert!(receiver.has_changed().unwrap());
        assert_eq!(receiver.borrow_and_update().version, version + 1);

        state.clear_roster();
        assert_eq!(receiver.borrow_and_update().version, version + 2);
        assert!(state.snapshot().players.is_empty());
    }

    #[test]
    fn test_toggle_mixed() {
        let mut state = connected_state(&[(1, true), (2, false), (3, true)]);

        let batch = state.toggle(&players(&[(1, true), (2, false)]));
        assert_eq!(batch.eliminate, vec![1]);
        assert_eq!(batch.revive, vec![2]);
        assert_eq!(roster_pairs(&state.snapshot().players), vec![(1, false), (2, true), (3, true)]);
    }

    #[test]
    fn test_toggle_twice_restores() {
        let mut state = connected_state(&[(1, true), (2, false), (3, true)]);
        let toggled = players(&[(1, true), (2, false)]);

        state.toggle(&toggled);
        state.toggle(&toggled);
        assert_eq!(roster_pairs(state.roster().players()), vec![(1, true), (2, false), (3, true)]);
    }

    #[rstest]
    #[case::stale_caller_view(&[(3, true)], vec![3], vec![])]
    #[case::duplicates(&[(1, true), (1, true), (1, false)], vec![1, 1], vec![1])]
    #[case::unknown_alive(&[(99, true)], vec![99], vec![])]
    #[case::unknown_dead(&[(99, false)], vec![], vec![99])]
    fn test_toggle_classification(#[case] toggled: &[(PlayerNumber, bool)], #[case] eliminate: Vec<PlayerNumber>, #[case] revive: Vec<PlayerNumber>) {
        let mut state = connected_state(&[(1, true), (2, true), (3, false)]);

        let batch = state.toggle(&players(toggled));
        assert_eq!(batch.eliminate, eliminate);
        assert_eq!(batch.revive, revive);
    }

    #[rstest]
    #[case::stale_caller_view(&[(3, true)], vec![(1, true), (2, true), (3, true)])]
    #[case::duplicates_flip_per_occurrence(&[(1, true), (1, true), (2, true)], vec![(1, true), (2, false), (3, false)])]
    #[case::unknown_player(&[(99, false)], vec![(1, true), (2, true), (3, false)])]
    fn test_toggle_flips_roster_entry(#[case] toggled: &[(PlayerNumber, bool)], #[case] expected: Vec<(PlayerNumber, bool)>) {
        let mut state = connected_state(&[(1, true), (2, true), (3, false)]);

        state.toggle(&players(toggled));
        assert_eq!(roster_pairs(state.roster().players()), expected);
    }

    #[test]
    fn test_toggle_unknown_player_does_not_publish() {
        let mut state = connected_state(&[(1, true)]);
        let version = state.snapshot().version;

        let batch = state.toggle(&players(&[(5, true)]));
        assert!(!batch.is_empty());
        assert_eq!(state.snapshot().version, version);
        assert_eq!(roster_pairs(state.roster().players()), vec![(1, true)]);
    }
}
