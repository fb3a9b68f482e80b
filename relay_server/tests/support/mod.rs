// Shared bootstrap and websocket helpers for relay integration tests.

use futures_util::{SinkExt, StreamExt};
use protocol::{ClientPacket, ServerPacket};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Generous upper bound; every awaited frame normally arrives in milliseconds.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Boots a fresh relay on an ephemeral port and returns its websocket URL.
///
/// Each test gets its own server: the relay hosts exactly one room per
/// process, so a shared instance would leak frames between tests.
pub async fn spawn_relay() -> String {
    // Bind to an ephemeral port to avoid collisions with local services.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral test port");
    let addr = listener.local_addr().expect("get local addr");

    // The listener is bound before the task starts, so clients can connect
    // right away; early sockets wait in the accept backlog.
    tokio::spawn(async move {
        let _ = relay_server::run(listener).await;
    });

    format!("ws://{addr}/ws")
}

pub async fn connect(url: &str) -> WsClient {
    let (socket, _response) = connect_async(url).await.expect("websocket connect");
    socket
}

pub async fn send_packet(socket: &mut WsClient, packet: &ClientPacket) {
    let text = serde_json::to_string(packet).expect("serialize client packet");
    send_text(socket, &text).await;
}

pub async fn send_text(socket: &mut WsClient, text: &str) {
    socket
        .send(Message::text(text))
        .await
        .expect("websocket send");
}

/// Reads frames until a packet arrives, skipping control traffic.
pub async fn recv_packet(socket: &mut WsClient) -> ServerPacket {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            let message = socket
                .next()
                .await
                .expect("connection closed while waiting for a packet")
                .expect("websocket recv");
            if let Message::Text(text) = message {
                return serde_json::from_str::<ServerPacket>(text.as_str())
                    .expect("parse server packet");
            }
        }
    })
    .await
    .expect("timed out waiting for a packet")
}
