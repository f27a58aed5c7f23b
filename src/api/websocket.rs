//! WebSocket handler for live monitoring updates
//!
//! Every client becomes a [`SubscriberConnection`] registered with the engine's
//! broadcaster. Published payloads go through a bounded channel to a writer task that owns
//! the socket's sending half.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    api::state::ApiState,
    broadcast::{SubscriberConnection, TransportError},
};

/// Broadcaster side of one websocket client
struct WsSubscriber {
    tx: mpsc::Sender<Arc<str>>,
}

#[async_trait]
impl SubscriberConnection for WsSubscriber {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn send(&self, payload: Arc<str>) -> Result<(), TransportError> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// WebSocket upgrade handler
///
/// GET /api/v1/stream
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.subscriber_buffer);
    let broadcaster = Arc::clone(state.engine.broadcaster());
    let id = broadcaster.register(Arc::new(WsSubscriber { tx }));

    info!("WebSocket client connected as {id}");

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender.send(Message::Text(payload.to_string())).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) => {
                    // Pong is automatically sent by axum
                    debug!("Received ping");
                }
                _ => {
                    // clients have nothing to tell us
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    broadcaster.unregister(id);
    info!("WebSocket client {id} disconnected");
}
