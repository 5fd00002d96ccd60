use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::RelayState;
use crate::protocol::{
    decode_message, decode_text, encode_message, encode_text, ClientMessage, Framing,
    ServerMessage,
};
use crate::relay::ConnectionId;

/// Handles WebSocket connections for individual clients
pub struct WebSocketHandler {
    socket: WebSocket,
    state: RelayState,
    framing: Framing,
}

impl WebSocketHandler {
    /// Create a new WebSocket handler
    pub fn new(socket: WebSocket, state: RelayState, framing: Framing) -> Self {
        Self {
            socket,
            state,
            framing,
        }
    }

    /// Handle the WebSocket connection until either side goes away
    pub async fn handle(self) {
        let (mut ws_sender, mut ws_receiver) = self.socket.split();

        // Create a channel for sending messages to this client
        let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

        let connection_id = self.state.registry().connect(tx).await;

        info!(
            "New WebSocket connection established for {} ({:?} framing)",
            connection_id, self.framing
        );

        if let Some(room_id) = self.state.default_room() {
            if let Err(e) = self.state.registry().join_room(connection_id, room_id).await {
                warn!(
                    "Connection {} could not join default room: {}",
                    connection_id, e
                );
            }
        }

        let framing = self.framing;
        let mut sender_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match encode_frame(&message, framing) {
                    Ok(frame) => {
                        if let Err(e) = ws_sender.send(frame).await {
                            error!(
                                "Failed to send WebSocket message to connection {}: {}",
                                connection_id, e
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        error!(
                            "Failed to encode message for connection {}: {}",
                            connection_id, e
                        );
                    }
                }
            }
            debug!("Sender task ended for connection {}", connection_id);
        });

        // Frames from one connection are handled strictly in arrival order
        let mut receiver_task = {
            let state = self.state.clone();

            tokio::spawn(async move {
                while let Some(msg) = ws_receiver.next().await {
                    let decoded = match msg {
                        Ok(Message::Text(text)) => decode_text(text.as_str()),
                        Ok(Message::Binary(data)) => decode_message(&data),
                        Ok(Message::Close(_)) => {
                            info!("Connection {} closed normally", connection_id);
                            break;
                        }
                        Ok(Message::Ping(_)) => {
                            // Axum handles pong responses automatically
                            debug!("Received ping from connection {}", connection_id);
                            continue;
                        }
                        Ok(Message::Pong(_)) => {
                            debug!("Received pong from connection {}", connection_id);
                            continue;
                        }
                        Err(e) => {
                            warn!("WebSocket error for connection {}: {}", connection_id, e);
                            break;
                        }
                    };

                    let result = match decoded {
                        Ok(message) => handle_client_message(&state, connection_id, message).await,
                        Err(e) => Err(e),
                    };

                    // Nothing is reported back to the client
                    if let Err(e) = result {
                        warn!(
                            "Ignoring message from connection {}: {}",
                            connection_id, e
                        );
                    }
                }
                debug!("Receiver task ended for connection {}", connection_id);
            })
        };

        let completion_reason = tokio::select! {
            _ = &mut sender_task => {
                receiver_task.abort();
                "sender task completed"
            }
            _ = &mut receiver_task => {
                sender_task.abort();
                "receiver task completed"
            }
        };

        info!(
            "WebSocket connection ending for {} ({})",
            connection_id, completion_reason
        );

        self.state.registry().disconnect(connection_id).await;

        info!(
            "Connection {} fully disconnected and cleaned up",
            connection_id
        );
    }
}

fn encode_frame(message: &ServerMessage, framing: Framing) -> crate::RelayResult<Message> {
    match framing {
        Framing::Text => Ok(Message::Text(encode_text(message)?.into())),
        Framing::Binary => Ok(Message::Binary(encode_message(message)?.into())),
    }
}

/// Handle a message from a client
async fn handle_client_message(
    state: &RelayState,
    connection_id: ConnectionId,
    message: ClientMessage,
) -> crate::RelayResult<()> {
    match message {
        ClientMessage::JoinRoom { room_id } => {
            debug!(
                "Connection {} joining room '{}'",
                connection_id, room_id
            );

            state.registry().join_room(connection_id, &room_id).await?;
        }

        ClientMessage::SendChanges { payload } => {
            debug!(
                "Received {} byte update from connection {}",
                payload.len(),
                connection_id
            );

            state
                .broadcaster()
                .relay_change(connection_id, payload)
                .await;
        }
    }

    Ok(())
}
