use crate::interface_adapters::state::AppState;
use crate::interface_adapters::utils::rng::next_conn_id;
use crate::use_cases::{RoomEvent, RoomFrame, RoomHandle};

use axum::{
    Error,
    extract::{
        State,
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::SinkExt;
use protocol::{ClientPacket, ServerPacket};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, info_span, warn};

#[derive(Debug)]
enum NetError {
    // Categorizes connection lifecycle failures so callers can decide policy.
    #[allow(dead_code)]
    Ws(axum::Error),
    #[allow(dead_code)]
    Serialization(serde_json::Error),
    RoomClosed,
    FanoutClosed,
}

const LOG_THROTTLE: Duration = Duration::from_secs(2);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let room = state.room.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, room))
}

async fn handle_socket(mut socket: WebSocket, room: RoomHandle) {
    let conn_id = next_conn_id();
    let span = info_span!("conn", conn_id);
    let _enter = span.enter();

    let mut ctx = match bootstrap_connection(&mut socket, conn_id, &room).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = ?e, "failed to bootstrap connection");
            let _ = socket.close().await;
            return;
        }
    };

    info!(conn_id, "client connected");

    // Main Client Loop
    if let Err(e) = run_client_loop(&mut socket, &mut ctx).await {
        warn!(error = ?e, "client loop exited with error");
    }
}

async fn send_packet(socket: &mut WebSocket, packet: &ServerPacket) -> Result<usize, NetError> {
    let txt = serde_json::to_string(packet).map_err(NetError::Serialization)?;
    let bytes = txt.len();
    socket
        .send(Message::Text(txt.into()))
        .await
        .map_err(NetError::Ws)?;
    Ok(bytes)
}

struct ConnCtx {
    pub conn_id: u64,
    pub event_tx: mpsc::Sender<RoomEvent>,
    pub frame_rx: broadcast::Receiver<RoomFrame>,

    pub msgs_in: u64,
    pub msgs_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,

    pub invalid_frames: u32,

    pub last_event_full_log: Instant,
    pub last_lag_log: Instant,
    pub last_invalid_frame_log: Instant,
}

async fn bootstrap_connection(
    socket: &mut WebSocket,
    conn_id: u64,
    room: &RoomHandle,
) -> Result<ConnCtx, NetError> {
    // Subscribe *before* the Join round-trip so frames published while the
    // snapshot is in flight queue up instead of being missed. A frame can
    // therefore restate something already in the snapshot; clients treat
    // Spawn as an upsert, so the overlap is harmless.
    let frame_rx = room.frame_tx.subscribe();

    let (reply_tx, reply_rx) = oneshot::channel();
    room.event_tx
        .send(RoomEvent::Join {
            conn_id,
            reply: reply_tx,
        })
        .await
        .map_err(|_| NetError::RoomClosed)?;
    let players = reply_rx.await.map_err(|_| NetError::RoomClosed)?;

    // Init is the handshake-complete signal; nothing else goes out first.
    let bytes_out = match send_packet(socket, &ServerPacket::Init { players }).await {
        Ok(bytes) => bytes,
        Err(e) => {
            // The room counted this connection at Join; balance it.
            let _ = room.event_tx.send(RoomEvent::Leave { conn_id }).await;
            return Err(e);
        }
    };

    let now = Instant::now() - LOG_THROTTLE;
    Ok(ConnCtx {
        conn_id,
        event_tx: room.event_tx.clone(),
        frame_rx,

        msgs_in: 0,
        msgs_out: 1,
        bytes_in: 0,
        bytes_out: bytes_out as u64,

        invalid_frames: 0,

        last_event_full_log: now,
        last_lag_log: now,
        last_invalid_frame_log: now,
    })
}

enum LoopControl {
    Continue,
    Disconnect,
}

fn should_log(last: &mut Instant) -> bool {
    if last.elapsed() >= LOG_THROTTLE {
        *last = Instant::now();
        true
    } else {
        false
    }
}

async fn run_client_loop(socket: &mut WebSocket, ctx: &mut ConnCtx) -> Result<(), NetError> {
    let conn_id = ctx.conn_id;

    // Split borrows so `tokio::select!` can hold them concurrently.
    let ConnCtx {
        event_tx,
        frame_rx,
        msgs_in,
        msgs_out,
        bytes_in,
        bytes_out,
        invalid_frames,
        last_event_full_log,
        last_lag_log,
        last_invalid_frame_log,
        ..
    } = ctx;

    let mut fatal: Option<NetError> = None;

    loop {
        // disconnect becomes true on error
        let disconnect: bool = tokio::select! {
            // Incoming Message from Client
            incoming = socket.recv() => {
                match handle_incoming_ws(
                    incoming,
                    conn_id,
                    event_tx,
                    msgs_in,
                    bytes_in,
                    invalid_frames,
                    last_event_full_log,
                    last_invalid_frame_log,
                ) {
                    Ok(LoopControl::Continue) => false,
                    Ok(LoopControl::Disconnect) => true,
                    Err(e) => {
                        fatal = Some(e);
                        true
                    }
                }
            }

            // Outgoing Room Frame
            frame = frame_rx.recv() => {
                match frame {
                    Ok(frame) => {
                        if frame.origin == conn_id {
                            // Own packets come back through the fan-out;
                            // only peers should hear them.
                            false
                        } else {
                            match forward_frame(frame.bytes, socket, msgs_out, bytes_out).await {
                                LoopControl::Continue => false,
                                LoopControl::Disconnect => true,
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Best-effort delivery: missed frames stay missed.
                        if should_log(last_lag_log) {
                            warn!(conn_id, missed = n, "fan-out lagged; dropping missed frames");
                        }
                        false
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        fatal = Some(NetError::FanoutClosed);
                        true
                    }
                }
            }
        };

        if disconnect {
            if let Err(err) = socket.close().await.map_err(NetError::Ws) {
                debug!(error = ?err, "socket close error");
            }
            break;
        }
    }

    if let Err(e) = disconnect_cleanup(
        conn_id,
        event_tx,
        *msgs_in,
        *msgs_out,
        *bytes_in,
        *bytes_out,
        *invalid_frames,
    )
    .await
    {
        warn!(error = ?e, "error during disconnect cleanup");
        if fatal.is_none() {
            fatal = Some(e);
        }
    }

    if let Some(err) = fatal { Err(err) } else { Ok(()) }
}

#[allow(clippy::too_many_arguments)]
fn handle_incoming_ws(
    incoming: Option<Result<Message, Error>>,
    conn_id: u64,
    event_tx: &mpsc::Sender<RoomEvent>,
    msgs_in: &mut u64,
    bytes_in: &mut u64,
    invalid_frames: &mut u32,
    last_event_full_log: &mut Instant,
    last_invalid_frame_log: &mut Instant,
) -> Result<LoopControl, NetError> {
    match incoming {
        Some(Ok(msg)) => match msg {
            Message::Text(text) => {
                *msgs_in += 1;
                *bytes_in += text.len() as u64;

                match serde_json::from_str::<ClientPacket>(&text) {
                    Ok(packet) => {
                        match event_tx.try_send(RoomEvent::Packet { conn_id, packet }) {
                            Ok(()) => Ok(LoopControl::Continue),
                            Err(mpsc::error::TrySendError::Full(_evt)) => {
                                if should_log(last_event_full_log) {
                                    warn!(conn_id, "room event channel full; dropping packet");
                                }
                                Ok(LoopControl::Continue)
                            }
                            Err(mpsc::error::TrySendError::Closed(_evt)) => {
                                Err(NetError::RoomClosed)
                            }
                        }
                    }
                    Err(parse_err) => {
                        // Malformed frames are dropped and counted; the
                        // connection itself always stays open.
                        *invalid_frames += 1;
                        if should_log(last_invalid_frame_log) {
                            warn!(
                                conn_id,
                                bytes = text.len(),
                                error = %parse_err,
                                "failed to parse client packet"
                            );
                        }
                        Ok(LoopControl::Continue)
                    }
                }
            }
            // Only text frames carry packets; the rest is tolerated noise.
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => Ok(LoopControl::Continue),
            Message::Close(_) => Ok(LoopControl::Disconnect),
        },
        Some(Err(e)) => {
            warn!(conn_id, error = %e, "websocket recv error");
            Ok(LoopControl::Disconnect)
        }
        None => {
            info!(conn_id, "websocket closed");
            Ok(LoopControl::Disconnect)
        }
    }
}

async fn forward_frame(
    bytes: Utf8Bytes,
    socket: &mut WebSocket,
    msgs_out: &mut u64,
    bytes_out: &mut u64,
) -> LoopControl {
    let bytes_len = bytes.len();
    match socket.send(Message::Text(bytes)).await.map_err(NetError::Ws) {
        Ok(()) => {
            *msgs_out += 1;
            *bytes_out += bytes_len as u64;
            LoopControl::Continue
        }
        Err(err) => {
            // Log unexpected send failures; disconnect will follow immediately.
            warn!(error = ?err, "failed to forward room frame");
            LoopControl::Disconnect
        }
    }
}

async fn disconnect_cleanup(
    conn_id: u64,
    event_tx: &mpsc::Sender<RoomEvent>,
    msgs_in: u64,
    msgs_out: u64,
    bytes_in: u64,
    bytes_out: u64,
    invalid_frames: u32,
) -> Result<(), NetError> {
    // Leave must reach the room even when the socket died abnormally, so
    // peers get their Remove and the room can hibernate.
    event_tx
        .send(RoomEvent::Leave { conn_id })
        .await
        .map_err(|_| NetError::RoomClosed)?;

    debug!(
        conn_id,
        msgs_in, msgs_out, bytes_in, bytes_out, invalid_frames, "connection stats"
    );
    info!(conn_id, "client disconnected");
    Ok(())
}
