use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

pub type PlayerNumber = u32;

/// A single participant. The number is both the stable identity and the display id, so equality,
///  ordering and hashing look at the number only - two players with the same number are the same
///  player, regardless of what each side currently believes about their aliveness.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Player {
    pub number: PlayerNumber,
    pub is_alive: bool,
}

impl Player {
    pub fn new(number: PlayerNumber, is_alive: bool) -> Player {
        Player {
            number,
            is_alive,
        }
    }

    /// The roster to show before any server data arrived: players `1..=count`, all alive.
    pub fn default_players(count: u32) -> Vec<Player> {
        (1..=count)
            .map(|number| Player::new(number, true))
            .collect()
    }
}

impl Debug for Player {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}({})", self.number, if self.is_alive { "alive" } else { "eliminated" })
    }
}

impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}
impl Eq for Player {}

impl PartialOrd for Player {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Player {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

impl Hash for Player {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.number.hash(state);
    }
}
