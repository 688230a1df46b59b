//! One viewer's WebSocket connection.

use axum::extract::ws::{Message, WebSocket};
use serde::Deserialize;
use tally::{Hub, ServerEvent, SessionId};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Event sent from a viewer to the server.
///
/// Same `{"event": .., "data": ..}` framing as [`ServerEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ClientEvent {
    Subscribe { channel: String },
}

/// Apply one text frame from the viewer. Frames that do not parse are ignored.
pub fn handle_client_text(hub: &Hub, id: SessionId, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::Subscribe { channel }) => {
            hub.subscribe(id, &channel);
        }
        Err(e) => debug!(session_id = id, error = %e, "ignoring client frame"),
    }
}

/// Serve a viewer until the socket closes or the server shuts down.
///
/// The session is registered with the hub for exactly as long as this runs.
pub async fn run_session(mut socket: WebSocket, hub: Hub, shutdown: CancellationToken) {
    let (id, mut outbound) = hub.register();

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            event = outbound.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => handle_client_text(&hub, id, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session_id = id, error = %e, "viewer socket error");
                    break;
                }
            },
        }
    }

    hub.remove(id);
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    // ServerEvent holds only strings, serialization cannot fail
    let text = serde_json::to_string(event).unwrap_or_default();
    socket.send(Message::Text(text)).await
}
