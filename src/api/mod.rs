use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};

pub mod handlers;
pub mod responses;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/receive_data", post(handlers::receive_data))
        .route("/get_latest_data", get(handlers::get_latest_data))
        .route("/events", get(handlers::stream_events))
        .route("/api/health", get(handlers::get_health))
        .with_state(state)
}
