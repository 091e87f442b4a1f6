//! Client WebSocket: attach/stop commands in, session events out.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::domain::{AppError, ClientMessage, SessionEvent, ValidationError};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: String,
}

/// Upgrade to a session socket for `user_id`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> Result<Response, AppError> {
    let user_id = params.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(AppError::Validation(ValidationError::InvalidField {
            field: "user_id".to_string(),
            message: "user_id is required".to_string(),
        }));
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: String) {
    let (connection_id, mut events) = state.hub.connect(&user_id);
    let (mut sink, mut stream) = socket.split();
    info!(user_id = %user_id, connection_id, "Session connected");

    let mut writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize session event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_user = user_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    handle_client_message(&reader_state, &reader_user, text.as_str()).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    // A replaced connection leaves the watch to its successor
    if state.hub.disconnect(&user_id, connection_id) {
        state.registry.detach(&user_id).await;
        info!(user_id = %user_id, connection_id, "Session disconnected");
    } else {
        debug!(user_id = %user_id, connection_id, "Superseded session closed");
    }
}

async fn handle_client_message(state: &AppState, user_id: &str, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            state.hub.send(
                user_id,
                SessionEvent::Error {
                    message: format!("invalid message: {}", e),
                },
            );
            return;
        }
    };

    match message {
        ClientMessage::Attach(request) => match state.registry.attach(user_id, &request).await {
            Ok(outcome) => {
                state.hub.send(
                    user_id,
                    SessionEvent::Attached {
                        chain: request.chain,
                        currency: request.currency.trim().to_ascii_uppercase(),
                        address: request.chain.normalize_address(&request.address),
                        monitor: outcome.kind,
                        reused: outcome.reused,
                        status: outcome.state,
                    },
                );
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Attach rejected");
                state.hub.send(
                    user_id,
                    SessionEvent::Error {
                        message: e.to_string(),
                    },
                );
            }
        },
        ClientMessage::Stop => {
            state.registry.stop(user_id).await;
        }
    }
}
