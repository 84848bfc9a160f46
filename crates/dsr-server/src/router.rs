use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use dsr_protocol::endpoints;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::AppState;

/// Build the axum router with all dsrpc endpoints.
pub fn build_router(state: AppState) -> Router {
    // Room for the frame header on top of the payload limit.
    let body_limit = state.max_message_size + 5;
    Router::new()
        .route(endpoints::PUT, post(handler::put_handler))
        .route(endpoints::DELETE, post(handler::delete_handler))
        .route(endpoints::GET, post(handler::get_handler))
        .route(endpoints::HAS, post(handler::has_handler))
        .route(endpoints::SIZE, post(handler::size_handler))
        .route(endpoints::QUERY, post(handler::query_handler))
        .route(endpoints::HEALTH, get(handler::health_handler))
        .route(endpoints::INFO, get(handler::info_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
