//! Relay connection plumbing.
//!
//! A single pump task owns the websocket: inbound text frames are parsed
//! and queued for the engine, outbound packets are serialized and written.
//! The engine never touches the socket directly, so a discarded connection
//! tears down by aborting one task.

use futures_util::{SinkExt, StreamExt};
use protocol::{ClientPacket, ServerPacket};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

const INBOUND_CAPACITY: usize = 256;
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to reach the relay: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// A live relay link.
pub struct Connection {
    pub(crate) inbound_rx: mpsc::Receiver<ServerPacket>,
    pub(crate) outbound_tx: mpsc::Sender<ClientPacket>,
    pub(crate) pump: JoinHandle<()>,
}

impl Connection {
    /// Opens the websocket and spawns the pump task.
    pub async fn open(url: &str) -> Result<Self, ConnectError> {
        let (socket, _response) = connect_async(url).await?;
        info!(%url, "connected to relay");

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let pump = tokio::spawn(pump_task(socket, inbound_tx, outbound_rx));

        Ok(Self {
            inbound_rx,
            outbound_tx,
            pump,
        })
    }
}

async fn pump_task(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    inbound_tx: mpsc::Sender<ServerPacket>,
    mut outbound_rx: mpsc::Receiver<ClientPacket>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerPacket>(text.as_str()) {
                            Ok(packet) => {
                                if inbound_tx.send(packet).await.is_err() {
                                    // The engine dropped its receiver.
                                    break;
                                }
                            }
                            Err(e) => {
                                // A bad frame costs us that frame, not the
                                // connection.
                                warn!(error = %e, "dropping unparseable server frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive failed");
                        break;
                    }
                }
            }
            outgoing = outbound_rx.recv() => {
                let Some(packet) = outgoing else {
                    // Every sender is gone; close the link politely.
                    let _ = sink.close().await;
                    break;
                };
                let text = match serde_json::to_string(&packet) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize outbound packet");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(error = %e, "websocket send failed");
                    break;
                }
            }
        }
    }

    debug!("connection pump finished");
}

/// A connection wired to in-process channels instead of a socket.
#[cfg(test)]
pub fn loopback() -> (
    Connection,
    mpsc::Sender<ServerPacket>,
    mpsc::Receiver<ClientPacket>,
) {
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let pump = tokio::spawn(async {});
    (
        Connection {
            inbound_rx,
            outbound_tx,
            pump,
        },
        inbound_tx,
        outbound_rx,
    )
}
