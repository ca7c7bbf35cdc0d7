//! WebSocket transport: one full-duplex channel per client.
//!
//! Text frames carry JSON control messages; binary frames carry raw PCM in
//! both directions (16 kHz uplink, 24 kHz downlink). The transport never
//! interprets binary frames -- uplink PCM goes straight to the session and
//! downlink frames come straight off the session's outbound queue, order
//! preserved. Connection close from either side tears the session down.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parlance_identity::IdentityStore;
use parlance_types::{ServerMessage, Settings};

use crate::session::{Outbound, Session, OUTBOUND_QUEUE_DEPTH};

/// Process-wide state shared by all connections.
pub struct AppState {
    /// Startup settings.
    pub settings: Settings,
    /// The identity store (artifacts are process-global).
    pub identity: Arc<IdentityStore>,
}

/// Build the server router: the voice WebSocket and a health probe.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

/// `GET /ws` -- upgrade to the voice WebSocket.
async fn ws_upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Main handler for one client connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("websocket accepted");
    let (mut ws_sink, mut ws_stream) = socket.split();

    // Outbound pump: the session's frame queue -> the socket, in order.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_DEPTH);
    let pump = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let message = match frame {
                Outbound::Json(msg) => match serde_json::to_string(&msg) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!(error = %e, "failed to serialize outbound message");
                        continue;
                    }
                },
                Outbound::Pcm(pcm) => Message::Binary(pcm.into()),
            };
            if ws_sink.send(message).await.is_err() {
                debug!("outbound send failed; client gone");
                break;
            }
        }
    });

    let session = match Session::new(
        state.settings.clone(),
        state.identity.clone(),
        outbound_tx.clone(),
    ) {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "failed to build session");
            let _ = outbound_tx
                .send(Outbound::Json(ServerMessage::Error {
                    turn_id: None,
                    message: format!("session setup failed: {e}"),
                }))
                .await;
            drop(outbound_tx);
            let _ = pump.await;
            return;
        }
    };
    session.send_session_info().await;

    while let Some(message) = ws_stream.next().await {
        match message {
            Ok(Message::Binary(pcm)) => session.feed_audio(pcm.to_vec()).await,
            Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                Ok(control) => {
                    debug!(?control, "control message");
                    session.handle_control(control).await;
                }
                Err(_) => {
                    warn!("invalid control message");
                    let _ = outbound_tx
                        .send(Outbound::Json(ServerMessage::Error {
                            turn_id: None,
                            message: "Invalid JSON message".to_string(),
                        }))
                        .await;
                }
            },
            Ok(Message::Close(_)) => {
                info!("client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "websocket receive error");
                break;
            }
        }
    }

    session.shutdown().await;
    drop(session);
    drop(outbound_tx);
    let _ = pump.await;
    info!("websocket handler finished");
}
