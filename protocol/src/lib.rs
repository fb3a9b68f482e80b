// Wire contract shared by the relay and the client engine.
//
// Every frame is a UTF-8 JSON object carrying a numeric `type` tag. The
// client->relay and relay->client tag namespaces are independent: the same
// integer means different things per direction, so the two directions are
// modeled as two separate enums and must never be merged. serde's derived
// tagging only supports string tags, so the enum impls below are written by
// hand: serialization emits the tag field first, deserialization dispatches
// on it through `serde_json::Value`.

use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Persisted slice of a player, as stored in the relay directory and sent
/// inside `Spawn`/`Init` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Connection id injected by the relay; clients never pick their own.
    pub id: u64,
    pub name: String,
    pub sprite_index: u32,
    /// Tile coordinates, not pixels.
    pub x: i32,
    pub y: i32,
}

/// Messages a client sends to the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    // Absolute target tile of the sender's current step.
    Move { x: i32, y: i32 },
    // Announces the sender to the room; the relay fills in the id.
    Spawn {
        x: i32,
        y: i32,
        name: String,
        sprite_index: u32,
    },
    // Free-form chat line, relayed verbatim and never stored.
    Chat { message: String },
}

/// Messages the relay sends to clients.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Move { id: u64, x: i32, y: i32 },
    Spawn { player: PlayerState },
    Remove { id: u64 },
    Chat { id: u64, message: String },
    // Full directory snapshot; always the first frame on a new connection.
    Init { players: Vec<PlayerState> },
}

// Client->relay tag namespace. 3 is reserved.
const CLIENT_MOVE: u64 = 1;
const CLIENT_SPAWN: u64 = 2;
const CLIENT_CHAT: u64 = 4;

// Relay->client tag namespace. Overlaps the client namespace numerically
// but is a distinct contract.
const SERVER_MOVE: u64 = 1;
const SERVER_SPAWN: u64 = 2;
const SERVER_REMOVE: u64 = 3;
const SERVER_CHAT: u64 = 4;
const SERVER_INIT: u64 = 5;

impl Serialize for ClientPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClientPacket::Move { x, y } => {
                let mut s = serializer.serialize_struct("ClientPacket", 3)?;
                s.serialize_field("type", &CLIENT_MOVE)?;
                s.serialize_field("x", x)?;
                s.serialize_field("y", y)?;
                s.end()
            }
            ClientPacket::Spawn {
                x,
                y,
                name,
                sprite_index,
            } => {
                let mut s = serializer.serialize_struct("ClientPacket", 5)?;
                s.serialize_field("type", &CLIENT_SPAWN)?;
                s.serialize_field("x", x)?;
                s.serialize_field("y", y)?;
                s.serialize_field("name", name)?;
                s.serialize_field("spriteIndex", sprite_index)?;
                s.end()
            }
            ClientPacket::Chat { message } => {
                let mut s = serializer.serialize_struct("ClientPacket", 2)?;
                s.serialize_field("type", &CLIENT_CHAT)?;
                s.serialize_field("message", message)?;
                s.end()
            }
        }
    }
}

impl Serialize for ServerPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServerPacket::Move { id, x, y } => {
                let mut s = serializer.serialize_struct("ServerPacket", 4)?;
                s.serialize_field("type", &SERVER_MOVE)?;
                s.serialize_field("id", id)?;
                s.serialize_field("x", x)?;
                s.serialize_field("y", y)?;
                s.end()
            }
            ServerPacket::Spawn { player } => {
                let mut s = serializer.serialize_struct("ServerPacket", 2)?;
                s.serialize_field("type", &SERVER_SPAWN)?;
                s.serialize_field("player", player)?;
                s.end()
            }
            ServerPacket::Remove { id } => {
                let mut s = serializer.serialize_struct("ServerPacket", 2)?;
                s.serialize_field("type", &SERVER_REMOVE)?;
                s.serialize_field("id", id)?;
                s.end()
            }
            ServerPacket::Chat { id, message } => {
                let mut s = serializer.serialize_struct("ServerPacket", 3)?;
                s.serialize_field("type", &SERVER_CHAT)?;
                s.serialize_field("id", id)?;
                s.serialize_field("message", message)?;
                s.end()
            }
            ServerPacket::Init { players } => {
                let mut s = serializer.serialize_struct("ServerPacket", 2)?;
                s.serialize_field("type", &SERVER_INIT)?;
                s.serialize_field("players", players)?;
                s.end()
            }
        }
    }
}

// Per-variant payload shapes for deserialization. The extra `type` key left
// in the value is ignored by serde's default unknown-field handling.

#[derive(Deserialize)]
struct ClientMoveBody {
    x: i32,
    y: i32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientSpawnBody {
    x: i32,
    y: i32,
    name: String,
    sprite_index: u32,
}

#[derive(Deserialize)]
struct ClientChatBody {
    message: String,
}

#[derive(Deserialize)]
struct ServerMoveBody {
    id: u64,
    x: i32,
    y: i32,
}

#[derive(Deserialize)]
struct ServerSpawnBody {
    player: PlayerState,
}

#[derive(Deserialize)]
struct ServerRemoveBody {
    id: u64,
}

#[derive(Deserialize)]
struct ServerChatBody {
    id: u64,
    message: String,
}

#[derive(Deserialize)]
struct ServerInitBody {
    players: Vec<PlayerState>,
}

fn packet_tag<E: serde::de::Error>(value: &serde_json::Value) -> Result<u64, E> {
    value
        .get("type")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| E::custom("packet is missing a numeric `type` tag"))
}

impl<'de> Deserialize<'de> for ClientPacket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let tag = packet_tag(&value)?;
        match tag {
            CLIENT_MOVE => {
                let body: ClientMoveBody =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(ClientPacket::Move {
                    x: body.x,
                    y: body.y,
                })
            }
            CLIENT_SPAWN => {
                let body: ClientSpawnBody =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(ClientPacket::Spawn {
                    x: body.x,
                    y: body.y,
                    name: body.name,
                    sprite_index: body.sprite_index,
                })
            }
            CLIENT_CHAT => {
                let body: ClientChatBody =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(ClientPacket::Chat {
                    message: body.message,
                })
            }
            other => Err(D::Error::custom(format!(
                "unrecognized client packet tag {other}"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for ServerPacket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let tag = packet_tag(&value)?;
        match tag {
            SERVER_MOVE => {
                let body: ServerMoveBody =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(ServerPacket::Move {
                    id: body.id,
                    x: body.x,
                    y: body.y,
                })
            }
            SERVER_SPAWN => {
                let body: ServerSpawnBody =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(ServerPacket::Spawn {
                    player: body.player,
                })
            }
            SERVER_REMOVE => {
                let body: ServerRemoveBody =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(ServerPacket::Remove { id: body.id })
            }
            SERVER_CHAT => {
                let body: ServerChatBody =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(ServerPacket::Chat {
                    id: body.id,
                    message: body.message,
                })
            }
            SERVER_INIT => {
                let body: ServerInitBody =
                    serde_json::from_value(value).map_err(D::Error::custom)?;
                Ok(ServerPacket::Init {
                    players: body.players,
                })
            }
            other => Err(D::Error::custom(format!(
                "unrecognized server packet tag {other}"
            ))),
        }
    }
}
