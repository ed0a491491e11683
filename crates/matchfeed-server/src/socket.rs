use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use matchfeed_core::ServerMessage;
use tokio::sync::mpsc;

use crate::connection::{Connection, Frame};
use crate::hub::ConnectionHub;
use crate::protocol::ProtocolHandler;

/// Drive one upgraded socket until it closes. The reader runs inline; a
/// spawned writer drains the connection's frame queue.
pub async fn run(socket: WebSocket, hub: Arc<ConnectionHub>, protocol: ProtocolHandler) {
    let (conn, rx) = hub.accept();
    let (ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(write_frames(ws_tx, rx, Arc::clone(&conn), Arc::clone(&hub)));

    loop {
        let msg = tokio::select! {
            () = conn.closed() => break,
            msg = ws_rx.next() => msg,
        };
        match msg {
            Some(Ok(WsMessage::Text(text))) => {
                reply(&conn, protocol.handle_text(&conn, text.as_str()));
            }
            Some(Ok(WsMessage::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => reply(&conn, protocol.handle_text(&conn, text)),
                Err(_) => reply(&conn, Some(ServerMessage::error("Invalid JSON"))),
            },
            Some(Ok(WsMessage::Pong(_))) => conn.mark_alive(),
            Some(Ok(WsMessage::Ping(_))) => {} // axum answers pings itself
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "socket read failed");
                hub.terminate(&conn, "read failed");
                break;
            }
        }
    }

    hub.close(&conn);
    if writer.await.is_err() {
        tracing::warn!(connection_id = %conn.id(), "socket writer panicked");
    }
}

fn reply(conn: &Connection, message: Option<ServerMessage>) {
    if let Some(message) = message {
        let _ = conn.send(&message);
    }
}

async fn write_frames(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Frame>,
    conn: Arc<Connection>,
    hub: Arc<ConnectionHub>,
) {
    loop {
        let frame = tokio::select! {
            () = conn.closed() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let msg = match frame {
            Frame::Text(text) => WsMessage::Text(text),
            Frame::Ping => WsMessage::Ping(vec![].into()),
        };
        if let Err(e) = ws_tx.send(msg).await {
            tracing::debug!(connection_id = %conn.id(), error = %e, "socket write failed");
            hub.terminate(&conn, "send failed");
            break;
        }
    }
    let _ = ws_tx.close().await;
}
