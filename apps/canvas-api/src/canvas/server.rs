//! WebSocket upgrade handler and per-connection event loop for `/canvas`.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time;

use crate::auth::identity;
use crate::store::access::AccessLevel;
use crate::store::documents::CanvasDocument;
use crate::AppState;

use super::messages::{ClientMessage, CursorPosition, ServerMessage};
use super::session::CanvasSession;

/// Close code for failed authentication (4000-range for application-level).
const CLOSE_AUTH_FAILED: u16 = 4004;

/// Timeout for receiving the auth payload when neither the header nor the
/// query string carried a token (seconds).
const AUTH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    token: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/canvas", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // Token precedence: Authorization header, then query parameter. A
    // connection with neither gets one chance to send an auth payload frame.
    let token = bearer_from_headers(&headers).or(params.token.filter(|t| !t.is_empty()));
    ws.on_upgrade(move |socket| handle_connection(socket, state, token))
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

async fn handle_connection(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let token = match token {
        Some(t) => t,
        None => match await_auth_payload(&mut ws_rx).await {
            Ok(t) => t,
            Err(reason) => {
                let _ = send_error_and_close(&mut ws_tx, reason).await;
                return;
            }
        },
    };

    let identity = match identity::verify_token(
        &token,
        &state.jwks,
        &state.config.service_audience,
        &state.config.identity_url,
    )
    .await
    {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(reason = %e.message, "canvas connection rejected");
            let _ = send_error_and_close(&mut ws_tx, &e.message).await;
            return;
        }
    };

    let mut session = CanvasSession::new(identity.user_id, identity.display_name);

    tracing::info!(
        session_id = %session.session_id,
        user_id = %session.user_id,
        "canvas session established"
    );

    // All outbound traffic flows through one queue per connection, drained
    // by its own writer task, so a slow client never blocks delivery to the
    // rest of a room.
    let (tx, rx) = mpsc::unbounded_channel();
    state.relay.register(&session.session_id, tx);
    tokio::spawn(write_outbound(ws_tx, rx));

    state.relay.send_to(
        &session.session_id,
        ServerMessage::Connected {
            user_id: session.user_id.clone(),
        },
    );

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(?e, session_id = %session.session_id, "ws read error");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        // A stray or corrupt frame must not take down an
                        // otherwise-healthy connection.
                        tracing::debug!(
                            ?e,
                            session_id = %session.session_id,
                            "dropping malformed frame"
                        );
                        continue;
                    }
                };
                dispatch(&state, &mut session, client_msg).await;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
            _ => continue,
        }
    }

    // Disconnect is an implicit leave: reap the session before this task
    // ends so no ghost member stays visible to the room.
    state.relay.unregister(&session.session_id);
    if let Some(canvas_id) = state.registry.leave(&session.session_id) {
        state.relay.broadcast_presence(&canvas_id);
    }

    tracing::info!(
        session_id = %session.session_id,
        user_id = %session.user_id,
        "canvas session ended"
    );
}

#[derive(Debug, Deserialize)]
struct AuthPayload {
    #[serde(default)]
    token: Option<String>,
}

/// Wait for the first text frame and read a `token` field out of it.
async fn await_auth_payload(ws_rx: &mut SplitStream<WebSocket>) -> Result<String, &'static str> {
    let result = time::timeout(Duration::from_secs(AUTH_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let msg = msg.map_err(|_| "Authentication failed: connection error")?;
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err("Authentication failed: connection closed"),
                Message::Ping(_) | Message::Pong(_) => continue,
                _ => continue,
            };
            let payload: AuthPayload = serde_json::from_str(&text)
                .map_err(|_| "Authentication failed: no token provided")?;
            return payload
                .token
                .filter(|t| !t.is_empty())
                .ok_or("Authentication failed: no token provided");
        }
        Err("Authentication failed: connection closed")
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_timeout) => Err("Authentication failed: timed out waiting for token"),
    }
}

/// Emit a single `error` event, then close. Used only before a session
/// exists; failures past this point never terminate the connection.
async fn send_error_and_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    reason: &str,
) -> Result<(), axum::Error> {
    let error = ServerMessage::Error {
        message: reason.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&error) {
        ws_tx.send(Message::Text(json.into())).await?;
    }
    ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_AUTH_FAILED,
            reason: reason.to_string().into(),
        })))
        .await
}

/// Serialize queued server messages onto the socket until the queue closes.
async fn write_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(message) = rx.recv().await {
        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::debug!(?e, "failed to encode outbound message");
                continue;
            }
        };
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}

async fn dispatch(state: &AppState, session: &mut CanvasSession, message: ClientMessage) {
    match message {
        ClientMessage::Join { canvas_id } => handle_join(state, session, canvas_id).await,
        ClientMessage::Leave => handle_leave(state, session),
        ClientMessage::Sync {
            canvas_id,
            elements,
            app_state,
        } => handle_sync(state, session, canvas_id, elements, app_state),
        ClientMessage::Awareness {
            canvas_id,
            cursor,
            selected_element_ids,
        } => handle_awareness(state, session, canvas_id, cursor, selected_element_ids),
    }
}

async fn handle_join(state: &AppState, session: &mut CanvasSession, canvas_id: String) {
    // The access check belongs to the platform's permission rules, not the
    // registry. A denied join leaves the connection open.
    let level = match state
        .access
        .access_level(&session.user_id, &canvas_id)
        .await
    {
        Ok(level) => level,
        Err(e) => {
            tracing::warn!(error = ?e, %canvas_id, "canvas access check failed");
            state.relay.send_to(
                &session.session_id,
                ServerMessage::Error {
                    message: "Could not verify canvas access".to_string(),
                },
            );
            return;
        }
    };
    if level < AccessLevel::Read {
        state.relay.send_to(
            &session.session_id,
            ServerMessage::Error {
                message: format!("No access to canvas {canvas_id}"),
            },
        );
        return;
    }

    let (member, left) = state.registry.join(
        &session.session_id,
        &session.user_id,
        &session.display_name,
        &canvas_id,
    );
    session.room = Some(canvas_id.clone());
    session.can_edit = level >= AccessLevel::Edit;

    // The room we switched out of sees us go.
    if let Some(previous) = left {
        state.relay.broadcast_presence(&previous);
    }

    let data = match state.documents.get(&canvas_id).await {
        Ok(Some(doc)) => doc,
        Ok(None) => CanvasDocument::default(),
        Err(e) => {
            tracing::warn!(error = ?e, %canvas_id, "canvas load failed, sending empty content");
            CanvasDocument::default()
        }
    };

    let users = state
        .registry
        .members(&canvas_id)
        .iter()
        .map(|m| m.to_presence())
        .collect();
    state.relay.send_to(
        &session.session_id,
        ServerMessage::Load {
            canvas_id: canvas_id.clone(),
            data,
            users,
        },
    );
    state.relay.broadcast_presence(&canvas_id);

    tracing::debug!(
        session_id = %session.session_id,
        %canvas_id,
        color = %member.color,
        "joined canvas"
    );
}

fn handle_leave(state: &AppState, session: &mut CanvasSession) {
    session.room = None;
    session.can_edit = false;
    if let Some(canvas_id) = state.registry.leave(&session.session_id) {
        state.relay.broadcast_presence(&canvas_id);
    }
}

fn handle_sync(
    state: &AppState,
    session: &CanvasSession,
    canvas_id: String,
    elements: Value,
    app_state: Option<Value>,
) {
    // Edits for a room this session is not in, or may not edit, are dropped
    // like any other stray frame.
    if session.room.as_deref() != Some(canvas_id.as_str()) {
        tracing::debug!(session_id = %session.session_id, %canvas_id, "sync for unjoined canvas");
        return;
    }
    if !session.can_edit {
        tracing::debug!(session_id = %session.session_id, %canvas_id, "sync without edit access");
        return;
    }

    state.relay.broadcast_sync(
        &canvas_id,
        &session.session_id,
        &session.user_id,
        &elements,
        &app_state,
    );
    state.saver.schedule(
        &canvas_id,
        CanvasDocument {
            elements,
            app_state,
        },
    );
}

fn handle_awareness(
    state: &AppState,
    session: &CanvasSession,
    canvas_id: String,
    cursor: Option<CursorPosition>,
    selected_element_ids: Option<Vec<String>>,
) {
    if session.room.as_deref() != Some(canvas_id.as_str()) {
        return;
    }
    state
        .registry
        .update_cursor(&session.session_id, cursor, selected_element_ids);
    state.relay.broadcast_awareness(&session.session_id);
}
