//! TCP listener and per-connection WebSocket tasks.
//!
//! Each accepted socket gets a reader loop (this task) and a writer task.
//! Rooms never touch sockets: they hold a [`Connection`], which pushes
//! pre-encoded frames into a bounded channel drained by the writer. A full
//! channel drops the frame instead of waiting, so a slow client can never
//! stall a room's tick.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::lobby::Lobby;
use crate::protocol::{ClientMessage, ConnectionId, ServerMessage};

/// Send side of one client connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Arc<str>>,
}

impl Connection {
    /// Wrap an existing outbound channel.
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Arc<str>>) -> Self {
        Self { id, outbound }
    }

    /// A connection plus the receiver its writer drains.
    pub fn channel(id: ConnectionId, buffer: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(id, tx), rx)
    }

    /// The connection's id.
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message. Never blocks; failures are dropped.
    pub fn send(&self, message: &ServerMessage) {
        if let Some(text) = message.encode() {
            self.send_encoded(text);
        }
    }

    /// Queue an already-encoded frame.
    pub fn send_encoded(&self, text: Arc<str>) {
        match self.outbound.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(connection = self.id, "Outbound buffer full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection = self.id, "Connection closed, dropping message");
            }
        }
    }
}

/// Bind the listener.
pub async fn bind(address: &str) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(address).await?;
    info!(address, "Listening for WebSocket clients");
    Ok(listener)
}

/// Accept connections forever, one task each.
pub async fn serve(listener: TcpListener, lobby: Lobby) {
    let mut next_id: ConnectionId = 1;

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let id = next_id;
                next_id += 1;
                let lobby = lobby.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, addr, id, lobby).await {
                        debug!(connection = id, %addr, error = %err, "Connection ended with error");
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    id: ConnectionId,
    lobby: Lobby,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream).await?;
    let (mut sink, mut frames) = ws_stream.split();
    let (connection, mut outbound) = Connection::channel(id, lobby.config().outbound_buffer);

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if let Err(err) = sink.send(Message::Text(text.to_string())).await {
                debug!(connection = id, error = %err, "Write failed, stopping writer");
                break;
            }
        }
        let _ = sink.close().await;
    });

    info!(connection = id, %addr, "Client connected");
    connection.send(&ServerMessage::Welcome { connection_id: id });

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch_text(&lobby, &connection, &text).await,
            Ok(Message::Binary(_)) => {
                connection.send(&ServerMessage::error("binary frames are not supported"));
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(connection = id, error = %err, "Read failed");
                break;
            }
        }
    }

    lobby.disconnected(id).await;
    writer.abort();
    info!(connection = id, %addr, "Client disconnected");
    Ok(())
}

/// Parse one text frame and route it. Malformed JSON gets an `ERROR`
/// notice and nothing else.
pub async fn dispatch_text(lobby: &Lobby, connection: &Connection, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => lobby.dispatch(connection, message).await,
        Err(err) => {
            debug!(connection = connection.id(), error = %err, "Malformed client message");
            connection.send(&ServerMessage::error(format!("malformed message: {err}")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoomConfig;

    fn decode(text: &str) -> ServerMessage {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_send_drops_when_full() {
        let (connection, mut rx) = Connection::channel(1, 1);
        connection.send(&ServerMessage::Paused);
        connection.send(&ServerMessage::Resumed);

        assert_eq!(decode(&rx.try_recv().unwrap()), ServerMessage::Paused);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_close_is_swallowed() {
        let (connection, rx) = Connection::channel(1, 4);
        drop(rx);
        connection.send(&ServerMessage::Paused);
    }

    #[tokio::test]
    async fn test_malformed_json_gets_error_notice() {
        let lobby = Lobby::new(RoomConfig::default());
        let (connection, mut rx) = Connection::channel(3, 8);

        dispatch_text(&lobby, &connection, "{not json").await;

        assert!(matches!(decode(&rx.try_recv().unwrap()), ServerMessage::Error { .. }));
        assert_eq!(lobby.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_valid_message_is_routed() {
        let lobby = Lobby::new(RoomConfig::default());
        let (connection, mut rx) = Connection::channel(3, 8);

        dispatch_text(&lobby, &connection, r#"{"type":"START_GAME"}"#).await;

        assert_eq!(decode(&rx.try_recv().unwrap()), ServerMessage::NotInRoom);
    }
}
