//! WebSocket endpoint — GET /ws?uid=…&thread_key=…
//!
//! Connections are keyed by uid. The per-connection task forwards frames
//! queued by the hub onto the socket; on connect, messages buffered for the
//! given thread while the user was away are replayed first.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use synapse_core::config::MAX_PAYLOAD_BYTES;

use crate::app::AppState;

/// Frames queued per connection before backpressure kicks in.
const CONN_QUEUE: usize = 256;

#[derive(Deserialize)]
pub struct WsParams {
    pub uid: String,
    #[allow(dead_code)]
    pub space_code: Option<String>,
    pub thread_key: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, params, state))
}

async fn handle_connection(socket: WebSocket, params: WsParams, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let uid = params.uid.clone();
    info!(conn_id = %conn_id, uid = %uid, "new WS connection");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(CONN_QUEUE);
    state.hub.register(&uid, &conn_id, tx);

    // Replay anything buffered for the thread while the user was offline.
    if let Some(ref thread_key) = params.thread_key {
        let replayed = state.hub.replay_buffered(&uid, thread_key).await;
        if replayed > 0 {
            debug!(uid = %uid, thread_key, replayed, "buffered messages replayed");
        }
    }

    loop {
        tokio::select! {
            // hub → client
            frame = rx.recv() => {
                match frame {
                    Some(data) => {
                        if sink.send(Message::Text(data.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // client → server: pings and client-side closes only; RPC goes
            // over HTTP.
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > MAX_PAYLOAD_BYTES {
                            warn!(conn_id, size = text.len(), "payload too large, closing");
                            break;
                        }
                        debug!(conn_id, len = text.len(), "ignoring inbound WS text");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(conn_id, error = %e, "WS receive error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.unregister(&uid, &conn_id);
    info!(conn_id, uid = %uid, "WS connection closed");
}
