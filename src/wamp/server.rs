// HTTP surface
// The WebSocket endpoint carrying WAMP and a health check

use super::message::Message;
use super::router::Router;
use super::session::{close_reason, Flow, Session};
use super::SUBPROTOCOL;
use crate::distribution::DISTRIBUTION;
use axum::{
    extract::{
        ws::{self, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Build the axum application serving WAMP on `path`
pub fn app(router: Arc<Router>, path: &str) -> axum::Router {
    axum::Router::new()
        .route(path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(router)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, app: axum::Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(router): State<Arc<Router>>) -> impl IntoResponse {
    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, router))
}

async fn handle_socket(socket: WebSocket, router: Arc<Router>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Some(reason) = close_reason(&message) {
                debug!("Sending close: {}", reason);
            }
            if ws_tx.send(ws::Message::Text(message.to_json())).await.is_err() {
                debug!("WebSocket send failed, closing writer");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut session = Session::new(router, tx);

    while let Some(frame) = ws_rx.next().await {
        match frame {
            Ok(ws::Message::Text(text)) => {
                if session.handle_text(&text) == Flow::Close {
                    break;
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary frames are not supported with {}", SUBPROTOCOL);
                break;
            }
            Ok(ws::Message::Close(_)) => {
                debug!("Client closed connection");
                break;
            }
            Ok(ws::Message::Ping(_)) | Ok(ws::Message::Pong(_)) => {}
            Err(e) => {
                warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    if let Some(id) = session.id() {
        info!("Session {} disconnected", id);
    }
    // Dropping the session detaches it and lets the writer drain
    drop(session);
    let _ = writer.await;
}

async fn health_handler(State(router): State<Arc<Router>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": DISTRIBUTION.name,
        "version": DISTRIBUTION.version,
        "realm": router.realm(),
        "procedures": router.procedures(),
        "sessions": router.session_count(),
    }))
}
