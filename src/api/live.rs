use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Extension;
use tokio::sync::broadcast;

use crate::api::middleware::CurrentUser;
use crate::api::state::AppState;
use crate::live::LiveEvent;

/// GET /api/messages/live (requires auth)
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Response {
    ws.on_upgrade(move |socket| ws_connection(socket, state, user.id))
}

async fn send_event(socket: &mut WebSocket, event: &LiveEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(WsMessage::Text(json)).await.is_ok(),
        Err(e) => {
            tracing::error!("failed to encode live event: {}", e);
            true
        }
    }
}

async fn ws_connection(mut socket: WebSocket, state: AppState, user_id: String) {
    // Subscribe before announcing so the roster reaches this socket too
    let mut rx = state.hub.subscribe();
    state.hub.connect(&user_id).await;

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(delivery) => {
                        if delivery.is_for(&user_id) && !send_event(&mut socket, &delivery.event).await {
                            break; // client disconnected
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(%user_id, "live client lagged, skipped {n} events");
                        if !send_event(&mut socket, &LiveEvent::EventsMissed { count: n }).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = socket.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(%user_id, "live socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(&user_id).await;
}
