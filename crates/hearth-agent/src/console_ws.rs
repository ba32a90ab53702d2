use std::sync::Arc;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use hearth_console::{ControlSignal, Multiplexer};
use hearth_process::{ResourceId, StreamKind};
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::{AppState, api::error_response};

pub async fn console_ws(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
    ws: WebSocketUpgrade,
) -> Response {
    let mux = match state.hub.attach(id).await {
        Ok(mux) => mux,
        Err(err) => return error_response(err),
    };
    ws.on_upgrade(move |socket| handle_console_socket(mux, socket))
        .into_response()
}

/// Bridges one websocket to one viewer session.
///
/// Non-empty text frames are console input (echoed to other viewers).
/// Stdout records go out as text frames, stderr records as binary frames.
/// Ping payloads carry echo control; tungstenite answers the pings itself.
async fn handle_console_socket(mux: Arc<Multiplexer>, socket: WebSocket) {
    let span = tracing::info_span!("console_ws", resource = %mux.id());
    async move {
        let (mut sender, mut receiver) = socket.split();

        let mut viewer = match mux.register_viewer().await {
            Ok(viewer) => viewer,
            Err(error) => {
                tracing::warn!(%error, "viewer registration refused");
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
        };
        let viewer_id = viewer.id();
        tracing::info!(viewer = %viewer_id, "viewer connected");

        let (tx, mut rx) = mpsc::channel::<Message>(64);
        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if sender.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let out = tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(line) = viewer.recv().await {
                let msg = match line.stream {
                    StreamKind::Stdout => {
                        Message::Text(String::from_utf8_lossy(&line.data).into_owned())
                    }
                    StreamKind::Stderr => Message::Binary(line.data.to_vec()),
                };
                if out.send(msg).await.is_err() {
                    return;
                }
            }
            // Console went away.
            let _ = out.send(Message::Close(None)).await;
        });

        while let Some(msg) = receiver.next().await {
            let Ok(msg) = msg else { break };
            match msg {
                Message::Text(text) if text.is_empty() => {}
                Message::Text(text) => {
                    if let Err(error) = mux.submit_input(viewer_id, text, false).await {
                        tracing::debug!(%error, "input rejected");
                        break;
                    }
                }
                Message::Ping(payload) => match ControlSignal::parse(&payload) {
                    ControlSignal::MuteEcho => {
                        mux.set_no_repeat(viewer_id, true).await;
                    }
                    ControlSignal::UnmuteEcho => {
                        mux.set_no_repeat(viewer_id, false).await;
                    }
                    ControlSignal::KeepAlive => {}
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        mux.deregister_viewer(viewer_id).await;
        forward.abort();
        drop(tx);
        writer.abort();
        tracing::info!(viewer = %viewer_id, "viewer disconnected");
    }
    .instrument(span)
    .await
}
