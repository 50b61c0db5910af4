//! WebSocket server handler
//!
//! One socket may join several documents. Session events reach the socket
//! through the connection's channel; when the socket closes, every document
//! it joined gets a `disconnect` for that connection.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use crate::collab::{Connection, Envelope, ServerEvent};
use crate::AppState;

/// WebSocket handler
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (connection, mut events) = Connection::channel();
    let connection_id = connection.id();
    tracing::debug!(%connection_id, "WebSocket connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Err(e) = sender.send(Message::Text(event.to_json().into())).await {
                tracing::error!("Failed to send event: {}", e);
                break;
            }
        }
    });

    // (document, identity) pairs joined through this socket
    let mut joined: HashSet<(String, String)> = HashSet::new();

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
        };

        let envelope = match Envelope::parse(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                connection.send(ServerEvent::error(&e));
                continue;
            }
        };

        match state.coordinator.dispatch(&envelope, &connection).await {
            Ok(()) => {
                if envelope.kind == "join" {
                    joined.insert((envelope.document_id, envelope.sender_id));
                }
            }
            Err(e) => {
                tracing::debug!(
                    kind = %envelope.kind,
                    document_id = %envelope.document_id,
                    sender_id = %envelope.sender_id,
                    "Rejected message: {}",
                    e
                );
                connection.send(ServerEvent::error(&e));
            }
        }
    }

    for (document_id, user_id) in joined {
        if let Err(e) = state
            .coordinator
            .disconnect(&document_id, &user_id, connection_id)
            .await
        {
            tracing::debug!(%document_id, %user_id, "Disconnect skipped: {}", e);
        }
    }

    drop(connection);
    writer.abort();
    tracing::debug!(%connection_id, "WebSocket closed");
}
