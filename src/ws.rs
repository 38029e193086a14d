// ABOUTME: WebSocket chat endpoint: handshake, frame decoding, and the per-connection loop.
// ABOUTME: Refusals close with taxonomy-specific codes before any chat state is touched.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use styx_core::error::ConnectRefusal;
use styx_core::events::{ClientFrame, ServerFrame};
use styx_core::traits::AuthenticatedUser;

use crate::metrics;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade handler at /ws/{room_id}?token=...
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, query.token))
}

async fn handle_socket(socket: WebSocket, state: AppState, room_id: String, token: Option<String>) {
    match admission_check(&state, &room_id, token.as_deref()).await {
        Ok(user) => run_connection(socket, state, room_id, user).await,
        Err(refusal) => {
            metrics::record_ws_refusal(refusal.close_code());
            tracing::warn!(
                room_id = %room_id,
                code = refusal.close_code(),
                reason = %refusal,
                "Connection refused"
            );
            close_with(socket, &refusal).await;
        }
    }
}

/// Resolve the auth tuple, load the room, and evaluate access. Only this
/// handshake may hard-close the socket, one distinct code per failure class.
async fn admission_check(
    state: &AppState,
    room_id: &str,
    token: Option<&str>,
) -> Result<AuthenticatedUser, ConnectRefusal> {
    let Some(token) = token else {
        return Err(ConnectRefusal::AuthenticationFailed);
    };
    let user = match state.auth.authenticate(token).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(ConnectRefusal::AuthenticationFailed),
        Err(e) => return Err(ConnectRefusal::PermissionCheck(e.to_string())),
    };

    let room = match state.rooms.get_room(room_id) {
        Ok(Some(room)) => room,
        Ok(None) => return Err(ConnectRefusal::RoomNotFound),
        Err(e) => return Err(ConnectRefusal::PermissionCheck(e.to_string())),
    };

    if !state
        .policy
        .can_access(&room, &user.user_id, user.role, user.is_restricted_account)
    {
        return Err(ConnectRefusal::AccessDenied);
    }
    Ok(user)
}

async fn close_with(mut socket: WebSocket, refusal: &ConnectRefusal) {
    let frame = CloseFrame {
        code: refusal.close_code(),
        reason: refusal.reason().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

/// The admitted connection loop: one writer task draining the outbound
/// queue, and this task as the single sequential reader.
async fn run_connection(
    socket: WebSocket,
    state: AppState,
    room_id: String,
    user: AuthenticatedUser,
) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerFrame>(64);

    let writer_user = user.user_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize outbound frame");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json.into())).await.is_err() {
                tracing::debug!(user_id = %writer_user, "Socket write failed, stopping writer");
                break;
            }
        }
    });

    let connection_id = state
        .orchestrator
        .connect_user(tx.clone(), &user, &room_id)
        .await;
    metrics::set_connected_users(state.registry.connection_count().await as u64);

    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => {
                    state
                        .orchestrator
                        .handle_frame(&user.user_id, &room_id, frame)
                        .await;
                }
                Err(e) => {
                    tracing::debug!(user_id = %user.user_id, error = %e, "Invalid frame from client");
                    let _ = tx
                        .send(ServerFrame::Error {
                            error: "Failed to process message".to_string(),
                        })
                        .await;
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Only tears down this admission; a reconnect that superseded us is
    // left alone.
    state
        .orchestrator
        .disconnect_user(&user.user_id, connection_id)
        .await;
    writer.abort();
    metrics::set_connected_users(state.registry.connection_count().await as u64);
    tracing::debug!(user_id = %user.user_id, room_id = %room_id, "WebSocket connection closed");
}
