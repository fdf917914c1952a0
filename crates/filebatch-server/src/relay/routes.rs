//! Relay routes
//!
//! `POST /write/:name` publishes `name` on the broker.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;

use super::Broker;

/// Create relay routes
pub fn relay_routes() -> Router<Broker> {
    Router::new().route("/write/:name", post(write))
}

/// Publish a name
///
/// POST /write/:name
async fn write(State(broker): State<Broker>, Path(name): Path<String>) -> impl IntoResponse {
    let subscribers = broker.publish(name.clone());
    tracing::debug!(topic = broker.topic(), subscribers, "Message published");

    (
        StatusCode::OK,
        Json(json!({
            "topic": broker.topic(),
            "message": name,
            "subscribers": subscribers,
        })),
    )
}
