use crate::messaging::codec::Command;
use crate::roster::player::PlayerNumber;

/// Collects the players toggled by a single user action, grouped by the direction of their
///  transition. A batch turns into at most one `eliminate` and at most one `revive` command, and
///  is discarded once these are sent.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ToggleBatch {
    pub eliminate: Vec<PlayerNumber>,
    pub revive: Vec<PlayerNumber>,
}

impl ToggleBatch {
    /// Register a player by their aliveness *before* the toggle
    pub fn add(&mut self, number: PlayerNumber, was_alive: bool) {
        if was_alive {
            self.eliminate.push(number);
        }
        else {
            self.revive.push(number);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.eliminate.is_empty() && self.revive.is_empty()
    }

    /// Eliminations are sent before revivals
    pub fn into_commands(self) -> Vec<Command> {
        let mut result = Vec::with_capacity(2);
        if !self.eliminate.is_empty() {
            result.push(Command::Eliminate { numbers: self.eliminate });
        }
        if !self.revive.is_empty() {
            result.push(Command::Revive { numbers: self.revive });
        }
        result
    }
}


#[cfg(test)]
mod test {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::empty(vec![], vec![])]
    #[case::only_alive(vec![(1, true), (4, true)], vec![Command::Eliminate { numbers: vec![1, 4] }])]
    #[case::only_dead(vec![(3, false)], vec![Command::Revive { numbers: vec![3] }])]
    #[case::mixed(vec![(2, false), (1, true)], vec![Command::Eliminate { numbers: vec![1] }, Command::Revive { numbers: vec![2] }])]
    fn test_into_commands(#[case] toggled: Vec<(PlayerNumber, bool)>, #[case] expected: Vec<Command>) {
        let mut batch = ToggleBatch::default();
        for (number, was_alive) in toggled {
            batch.add(number, was_alive);
        }
        assert_eq!(batch.is_empty(), expected.is_empty());
        assert_eq!(batch.into_commands(), expected);
    }
}
