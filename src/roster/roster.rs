use rustc_hash::FxHashMap;
use tracing::{trace, warn};

use crate::roster::player::{Player, PlayerNumber};

/// Sparse aliveness information as pushed by the server: only the players contained in the map
///  are affected.
pub type AliveMap = FxHashMap<PlayerNumber, bool>;

/// The ordered set of players as known to this client.
///
/// Players are kept sorted by number, and numbers are unique. The position index is rebuilt
///  whenever the roster is replaced wholesale, which is the only way players are ever added or
///  removed.
#[derive(Clone, Debug, Default)]
pub struct Roster {
    players: Vec<Player>,
    positions: FxHashMap<PlayerNumber, usize>,
}

impl Roster {
    pub fn new() -> Roster {
        Default::default()
    }

    pub fn from_players(players: Vec<Player>) -> Roster {
        let mut result = Roster::new();
        result.replace(players);
        result
    }

    /// Replace the entire roster. The new players are sorted by number; if a number occurs more
    ///  than once, the last occurrence wins.
    pub fn replace(&mut self, mut players: Vec<Player>) {
        // NB: stable sort, so that 'last occurrence' is well-defined after sorting
        players.sort_by_key(|p| p.number);

        let mut deduplicated: Vec<Player> = Vec::with_capacity(players.len());
        for p in players {
            match deduplicated.last_mut() {
                Some(last) if last.number == p.number => {
                    warn!("duplicate player number {} in roster - keeping the last entry", p.number);
                    *last = p;
                }
                _ => deduplicated.push(p),
            }
        }

        self.positions = deduplicated.iter()
            .enumerate()
            .map(|(idx, p)| (p.number, idx))
            .collect();
        self.players = deduplicated;
    }

    pub fn clear(&mut self) {
        self.players.clear();
        self.positions.clear();
    }

    /// Overwrite the aliveness of every player contained in `alive`, leaving all others untouched.
    ///  Numbers that are not part of the roster are ignored. Returns the number of players whose
    ///  aliveness actually changed.
    pub fn apply_update(&mut self, alive: &AliveMap) -> usize {
        let mut num_changed = 0;
        for (number, &is_alive) in alive {
            match self.positions.get(number) {
                Some(&idx) => {
                    let player = &mut self.players[idx];
                    if player.is_alive != is_alive {
                        player.is_alive = is_alive;
                        num_changed += 1;
                    }
                }
                None => trace!("update for player {} who is not in the roster - ignoring", number),
            }
        }
        num_changed
    }

    /// Flip a single player's aliveness, returning the aliveness *before* the flip - or `None` if
    ///  there is no such player.
    pub fn toggle(&mut self, number: PlayerNumber) -> Option<bool> {
        let idx = *self.positions.get(&number)?;
        let player = &mut self.players[idx];
        let was_alive = player.is_alive;
        player.is_alive = !was_alive;
        Some(was_alive)
    }

    pub fn get(&self, number: PlayerNumber) -> Option<&Player> {
        self.positions.get(&number)
            .map(|&idx| &self.players[idx])
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
