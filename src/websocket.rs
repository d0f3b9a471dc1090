use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::state::AppState;

/// Push verdict events to one observer connection until it closes.
///
/// Every connected observer receives every event - there is no per-observer
/// filtering, and no delivery guarantee beyond "while connected". A slow
/// observer that lags behind the broadcast buffer simply skips the missed
/// events.
pub async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.updates.subscribe();

    state.metrics.increment_connections().await;

    let mut send_task = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => match serde_json::to_string(&update) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to serialize update for observer");
                    }
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer connection lagged, events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                // Observers are receive-only; inbound frames are ignored.
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    state.metrics.decrement_connections().await;
}
