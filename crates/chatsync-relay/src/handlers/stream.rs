use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;

use chatsync_types::StreamingBroadcast;
use crate::{error::{ApiError, ApiResult}, state::AppState};

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Live subscribers the frame was handed to
    pub delivered: usize,
}

/// Accept a streaming frame from one session and fan it out to every
/// subscribed session of the same user
pub async fn publish_broadcast(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(frame): Json<StreamingBroadcast>,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    if frame.thread_id().is_empty() || frame.message_id().is_empty() {
        return Err(ApiError::BadRequest("thread_id and message_id are required".to_string()));
    }
    if frame.session_id().as_str().is_empty() {
        return Err(ApiError::BadRequest("session_id is required".to_string()));
    }

    let delivered = state.hub.publish(&user_id, frame);
    tracing::debug!(user_id = %user_id, delivered, "Relayed streaming frame");

    Ok((StatusCode::ACCEPTED, Json(PublishResponse { delivered })))
}

/// Subscribe to the user's streaming frames as Server-Sent Events.
///
/// Each frame is one `broadcast` event whose data is the JSON frame. A
/// subscriber that falls behind skips frames; later frames supersede them.
pub async fn subscribe_broadcasts(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.hub.subscribe(&user_id);
    tracing::info!(user_id = %user_id, "Session subscribed to streaming frames");

    let sse_stream = BroadcastStream::new(receiver).filter_map(move |frame| {
        let event = match frame {
            Ok(frame) => match Event::default().event("broadcast").json_data(&frame) {
                Ok(event) => Some(Ok::<Event, Infallible>(event)),
                Err(e) => {
                    tracing::error!("Failed to encode streaming frame: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::debug!(user_id = %user_id, "Subscriber lagged: {}", e);
                None
            }
        };
        futures::future::ready(event)
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(state.config.relay.keepalive()))
}
