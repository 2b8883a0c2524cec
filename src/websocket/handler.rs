use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};

use crate::auth::DeviceIdentity;
use crate::dispatch::TOO_MANY_CONNECTIONS;
use crate::server::AppState;
use crate::session::CloseReason;

/// WebSocket upgrade handler.
///
/// Verification runs before the upgrade completes; a rejected handshake is a
/// bare 401 with no session materialized and no detail leaked.
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, headers))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let identity = match state.verifier.verify(&headers).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "Handshake rejected");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    tracing::info!(
        device = %identity.uid,
        device_type = %identity.device_type,
        "WebSocket upgrade authorized"
    );

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Drive an established connection through its lifecycle.
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, identity),
    fields(device = %identity.uid)
)]
async fn handle_socket(socket: WebSocket, state: AppState, identity: DeviceIdentity) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Authenticated -> Active: acquire resources. Capacity failure rejects
    // with the sentinel and never opens a broker channel.
    let (session, mut rx) = match state.sessions.open(identity).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "Persistence acquisition failed, rejecting connection");
            let _ = ws_sender
                .send(Message::Text(TOO_MANY_CONNECTIONS.to_string().into()))
                .await;
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = session.id();

    // Outbound: drain the session's frame channel onto the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound: frames arrive serially and route through the dispatcher
    let recv_session = session.clone();
    let manager = state.sessions.clone();
    let recv_task = tokio::spawn(async move {
        let mut reason = CloseReason::Normal;
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    manager.inbound(&recv_session, &text).await;
                }
                Ok(Message::Binary(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    manager.inbound(&recv_session, &text).await;
                }
                Ok(Message::Close(_)) => {
                    tracing::debug!(connection_id = %recv_session.id(), "Received close frame");
                    break;
                }
                Ok(_) => {
                    // Ping/pong keep the session fresh
                    recv_session.touch().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    reason = CloseReason::TransportError;
                    break;
                }
            }
        }
        reason
    });

    let reason = tokio::select! {
        _ = send_task => CloseReason::TransportError,
        reason = recv_task => reason.unwrap_or(CloseReason::TransportError),
    };

    // Closing: release the handle, close the channel, unregister
    state.sessions.close(&session, reason).await;

    tracing::info!(
        connection_id = %connection_id,
        device = %session.identity().uid,
        "WebSocket connection closed"
    );
}
