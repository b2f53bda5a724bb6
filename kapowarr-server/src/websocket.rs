//! The websocket endpoint: every event on the bus is forwarded to every
//! connected socket as JSON.

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use kapowarr_model::Event;
use tracing::{debug, warn};

use crate::state::AppState;

pub async fn websocket_handler(
    upgrade: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state))
}

fn event_to_message(event: &Event) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(Utf8Bytes::from(json))),
        Err(error) => {
            warn!("Could not serialise event: {error}");
            None
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut events = state.app.bus.subscribe();
    debug!("Websocket client connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if let Some(message) = event_to_message(&event) {
                            if socket.send(message).await.is_err() {
                                break;
                            }
                        }
                    }
                    // Lagged: the subscriber missed events; keep going
                    // with the newer ones.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = socket.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    debug!("Websocket client disconnected");
}
