// Room fan-out: the single actor that owns the connection directory.

use protocol::{ClientPacket, PlayerState, ServerPacket};

use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info};

/// Events flowing from connection handlers into the room task.
#[derive(Debug)]
pub enum RoomEvent {
    /// A socket finished upgrading; reply with the directory snapshot.
    Join {
        conn_id: u64,
        reply: oneshot::Sender<Vec<PlayerState>>,
    },
    /// One parsed inbound packet from one connection.
    Packet { conn_id: u64, packet: ClientPacket },
    /// The socket is gone, cleanly or not.
    Leave { conn_id: u64 },
}

/// One serialized outbound packet, shared by every connection loop.
#[derive(Debug, Clone)]
pub struct RoomFrame {
    /// Originating connection; its own loop skips the frame.
    pub origin: u64,
    pub bytes: Utf8Bytes,
}

/// Channel endpoints for the room task.
#[derive(Clone)]
pub struct RoomHandle {
    /// Sender for events into the room task.
    pub event_tx: mpsc::Sender<RoomEvent>,
    /// Broadcast sender the room publishes serialized frames on.
    pub frame_tx: broadcast::Sender<RoomFrame>,
}

impl RoomHandle {
    /// Wires the channels and spawns the room task.
    pub fn spawn(event_capacity: usize, fanout_capacity: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel::<RoomEvent>(event_capacity);
        let (frame_tx, _frame_rx) = broadcast::channel::<RoomFrame>(fanout_capacity);

        tokio::spawn(room_task(event_rx, frame_tx.clone()));

        Self { event_tx, frame_tx }
    }
}

/// Owns the directory and processes one event at a time across all
/// connections, so the map needs no lock. Authority stays thin on purpose:
/// `Move` is relayed without adjacency, bounds, or rate checks. Legality is
/// enforced client-side only; whether that is a trust model or a gap is an
/// inherited behavior this hub does not second-guess.
pub async fn room_task(
    mut event_rx: mpsc::Receiver<RoomEvent>,
    frame_tx: broadcast::Sender<RoomFrame>,
) {
    let mut directory: HashMap<u64, PlayerState> = HashMap::new();
    let mut connections: usize = 0;

    while let Some(event) = event_rx.recv().await {
        match event {
            RoomEvent::Join { conn_id, reply } => {
                connections += 1;
                let players: Vec<PlayerState> = directory.values().cloned().collect();
                debug!(conn_id, connections, peers = players.len(), "connection joined");
                let _ = reply.send(players);
            }
            RoomEvent::Packet { conn_id, packet } => {
                handle_packet(&mut directory, &frame_tx, conn_id, packet)
            }
            RoomEvent::Leave { conn_id } => {
                connections = connections.saturating_sub(1);
                let known = directory.remove(&conn_id).is_some();
                debug!(conn_id, connections, known, "connection left");
                // Peers drop unknown ids, so Remove goes out even for
                // connections that never spawned.
                publish(&frame_tx, conn_id, &ServerPacket::Remove { id: conn_id });

                if connections == 0 {
                    // Hibernation: reconnecting clients must resend Spawn.
                    directory.clear();
                    info!("room empty; directory reset");
                }
            }
        }
    }
}

fn handle_packet(
    directory: &mut HashMap<u64, PlayerState>,
    frame_tx: &broadcast::Sender<RoomFrame>,
    conn_id: u64,
    packet: ClientPacket,
) {
    match packet {
        ClientPacket::Spawn {
            x,
            y,
            name,
            sprite_index,
        } => {
            // The id always comes from the connection, never the payload.
            let player = PlayerState {
                id: conn_id,
                name,
                sprite_index,
                x,
                y,
            };
            info!(conn_id, x, y, name = %player.name, "player spawned");
            directory.insert(conn_id, player.clone());
            publish(frame_tx, conn_id, &ServerPacket::Spawn { player });
        }
        ClientPacket::Move { x, y } => {
            // A Move can overtake the Spawn that creates the entry.
            let Some(player) = directory.get_mut(&conn_id) else {
                debug!(conn_id, "move before spawn ignored");
                return;
            };
            player.x = x;
            player.y = y;
            publish(frame_tx, conn_id, &ServerPacket::Move { id: conn_id, x, y });
        }
        ClientPacket::Chat { message } => {
            // Relayed verbatim, never stored.
            publish(
                frame_tx,
                conn_id,
                &ServerPacket::Chat {
                    id: conn_id,
                    message,
                },
            );
        }
    }
}

/// Serializes once and publishes the shared bytes tagged with their origin.
fn publish(frame_tx: &broadcast::Sender<RoomFrame>, origin: u64, packet: &ServerPacket) {
    let txt = match serde_json::to_string(packet) {
        Ok(txt) => txt,
        Err(e) => {
            error!(error = ?e, "failed to serialize outbound packet");
            return;
        }
    };
    // A send error only means no connection is subscribed right now.
    let _ = frame_tx.send(RoomFrame {
        origin,
        bytes: Utf8Bytes::from(txt),
    });
}
