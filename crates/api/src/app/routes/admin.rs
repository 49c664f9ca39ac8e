//! Operations endpoints: dead letters, parked events and consumer stats.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use jobboard_events::Topic;

use crate::app::{dto, errors, services::AppServices};

const DEFAULT_DEAD_LETTER_LIMIT: usize = 100;
const MAX_DEAD_LETTER_LIMIT: usize = 1_000;

pub fn router() -> Router {
    Router::new()
        .route("/dead-letters", get(dead_letters))
        .route("/undelivered-events", get(undelivered_events))
        .route("/undelivered-events/replay", post(replay_undelivered))
        .route("/consumers", get(consumers))
}

/// GET /admin/dead-letters - newest entries of one topic's DLQ, or of all topics
pub async fn dead_letters(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::DeadLettersQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DEAD_LETTER_LIMIT)
        .clamp(1, MAX_DEAD_LETTER_LIMIT);

    let topics: Vec<Topic> = match query.topic.as_deref() {
        None | Some("") => Topic::ALL.to_vec(),
        Some(raw) => match Topic::parse(raw) {
            Some(topic) => vec![topic],
            None => {
                return errors::json_error(StatusCode::BAD_REQUEST, "unknown_topic", format!("unknown topic {raw:?}"));
            }
        },
    };

    let mut items = Vec::new();
    for topic in topics {
        match services.bus.dead_letters(topic.as_str(), limit).await {
            Ok(mut entries) => items.append(&mut entries),
            Err(e) => return errors::bus_error_to_response(e),
        }
    }
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

/// GET /admin/undelivered-events - events a producer gave up on
pub async fn undelivered_events(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.replayer.undelivered().list().await {
        Ok(items) => (StatusCode::OK, Json(json!({ "items": items }))).into_response(),
        Err(msg) => errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg),
    }
}

/// POST /admin/undelivered-events/replay - publish every parked event again
pub async fn replay_undelivered(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.replayer.replay_undelivered().await {
        Ok(delivered) => {
            let remaining = services.replayer.undelivered().list().await.map(|l| l.len()).unwrap_or(0);
            (
                StatusCode::OK,
                Json(json!({ "delivered": delivered, "remaining": remaining })),
            )
                .into_response()
        }
        Err(e) => errors::publish_error_to_response(e),
    }
}

/// GET /admin/consumers - per-worker counters
pub async fn consumers(Extension(services): Extension<Arc<AppServices>>) -> Response {
    let items = services.consumers.iter().map(|m| m.snapshot()).collect::<Vec<_>>();
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}
