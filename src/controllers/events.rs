//! Поток событий мест рейса по WebSocket: фронтенд перерисовывает схему мест,
//! когда чьё-то удержание истекает, место продаётся или освобождается.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::{models::TripId, services::seat_locks::SeatEvent, AppState};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/trips/{trip_id}/events", get(trip_events))
}

// GET /api/trips/{trip_id}/events
async fn trip_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(trip_id): Path<TripId>,
) -> Response {
    // Подписываемся до апгрейда, чтобы не пропустить события
    let events = state.seat_locks.subscribe();
    info!("WebSocket connection requested for trip {}", trip_id);
    ws.on_upgrade(move |socket| stream_trip_events(socket, trip_id, events))
}

async fn stream_trip_events(
    socket: WebSocket,
    trip_id: TripId,
    mut events: broadcast::Receiver<SeatEvent>,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.trip_id() == trip_id => {
                    let Ok(json) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket for trip {} lagged, {} seat events skipped", trip_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("WebSocket for trip {} closed", trip_id);
}
