use serde_json::{json, Map, Value};

use crate::roster::player::{Player, PlayerNumber};

/// an `initial_data` frame in the shape the server sends it
pub fn initial_data_frame(players: &[(PlayerNumber, bool)]) -> String {
    let players = players.iter()
        .map(|&(number, is_alive)| (number.to_string(), json!({
            "image_url": "",
            "is_alive": is_alive,
            "number": number,
        })))
        .collect::<Map<String, Value>>();

    json!({
        "type": "initial_data",
        "players": players,
    }).to_string()
}

/// an `update` frame; keys are passed as strings so that non-numeric keys can be tested
pub fn update_frame(alive: &[(&str, i64)]) -> String {
    let alive = alive.iter()
        .map(|&(key, flag)| (key.to_string(), json!(flag)))
        .collect::<Map<String, Value>>();

    json!({
        "type": "update",
        "alive": alive,
    }).to_string()
}

/// (number, aliveness) pairs for comparing rosters - [Player] equality only looks at numbers
pub fn roster_pairs(players: &[Player]) -> Vec<(PlayerNumber, bool)> {
    players.iter()
        .map(|p| (p.number, p.is_alive))
        .collect()
}
