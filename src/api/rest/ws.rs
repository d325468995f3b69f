use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::SinkExt;
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::tracking::channel::{FeedEvent, Subscription};

/// Relays every lifecycle event to the connected notifier.
pub async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| relay_events(socket, state))
}

/// Push path of an order's location feed.
pub async fn live_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state.tracking.subscribe(order_id)?;
    Ok(ws.on_upgrade(move |socket| stream_location(socket, order_id, subscription)))
}

async fn relay_events(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, receiver) = socket.split();
    let events = state.events.stream();

    info!("event relay connected");

    let send_task = tokio::spawn(async move {
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            if !send_json(&mut sender, &event).await {
                break;
            }
        }
    });

    run_until_either_ends(send_task, receiver).await;
    info!("event relay disconnected");
}

async fn stream_location(socket: WebSocket, order_id: Uuid, mut subscription: Subscription) {
    let (mut sender, receiver) = socket.split();

    info!(order_id = %order_id, "live location subscriber connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let closed = matches!(event, FeedEvent::Closed);
            if !send_json(&mut sender, &event).await || closed {
                break;
            }
        }
        let _ = sender.close().await;
    });

    run_until_either_ends(send_task, receiver).await;
    info!(order_id = %order_id, "live location subscriber disconnected");
}

async fn send_json<T: Serialize>(sender: &mut SplitSink<WebSocket, Message>, payload: &T) -> bool {
    let json = match serde_json::to_string(payload) {
        Ok(json) => json,
        Err(err) => {
            warn!(error = %err, "failed to serialize ws payload");
            return true;
        }
    };

    sender.send(Message::Text(json.into())).await.is_ok()
}

async fn run_until_either_ends(
    mut send_task: tokio::task::JoinHandle<()>,
    mut receiver: futures::stream::SplitStream<WebSocket>,
) {
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
