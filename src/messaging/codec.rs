//! JSON wire format between the controller and the server.
//!
//! Outbound messages are [Command]s, identified by an `action` field. Inbound messages are
//!  identified by a `type` field and decoded into [ServerEvent]s. Decoding is per frame: a frame
//!  that fails to decode is an error for that frame only, it says nothing about the connection.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::roster::player::{Player, PlayerNumber};
use crate::roster::roster::AliveMap;

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Arm,
    Disarm,
    Eliminate { numbers: Vec<PlayerNumber> },
    Revive { numbers: Vec<PlayerNumber> },
}

/// Everything the session reports to its consumer, in arrival order. Only [ServerEvent::InitialData]
///  and [ServerEvent::Update] originate from the wire, the others are reported by the session
///  itself.
#[derive(Clone, Debug)]
pub enum ServerEvent {
    /// the complete roster, sorted by player number
    InitialData(Vec<Player>),
    /// aliveness for some (not necessarily all) players
    Update(AliveMap),
    Error(Arc<anyhow::Error>),
    /// the server closed the connection in an orderly fashion
    Disconnected,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    InitialData {
        players: BTreeMap<String, Player>,
    },
    Update {
        alive: BTreeMap<String, i64>,
    },
}

pub fn encode(command: &Command) -> anyhow::Result<Bytes> {
    let buf = serde_json::to_vec(command)
        .with_context(|| format!("serializing {:?}", command))?;
    Ok(buf.into())
}

pub fn decode(frame: &[u8]) -> anyhow::Result<ServerEvent> {
    let msg: InboundMessage = serde_json::from_slice(frame)
        .context("malformed server message")?;

    match msg {
        InboundMessage::InitialData { players } => {
            // NB: the record's number is authoritative, the key only has to be a valid number
            let mut players = players.into_iter()
                .map(|(key, p)| {
                    key.parse::<PlayerNumber>()
                        .with_context(|| format!("invalid player key {:?}", key))?;
                    if p.number == 0 {
                        return Err(anyhow!("invalid player number 0"));
                    }
                    Ok(p)
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            players.sort();
            Ok(ServerEvent::InitialData(players))
        }
        InboundMessage::Update { alive } => {
            let mut result = AliveMap::default();
            for (key, flag) in alive {
                match key.parse::<PlayerNumber>() {
                    Ok(number) => {
                        result.insert(number, flag != 0);
                    }
                    Err(_) => trace!("skipping non-player key {:?} in update", key),
                }
            }
            Ok(ServerEvent::Update(result))
        }
    }
}
