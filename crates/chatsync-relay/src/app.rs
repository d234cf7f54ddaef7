use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::{
    config::CorsConfig,
    handlers::stream,
    middleware::logging,
    routes::health,
    state::AppState,
};

/// Path of a user's broadcast channel
pub const BROADCASTS_PATH: &str = "/users/:user_id/broadcasts";

pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(health::health_check))
        // Streaming frames
        .route(
            BROADCASTS_PATH,
            post(stream::publish_broadcast).get(stream::subscribe_broadcasts),
        );

    Router::new()
        .merge(api_routes)
        .layer(middleware::from_fn(logging::log_request))
        .layer(TimeoutLayer::new(state.config.server.request_timeout()))
        .layer(build_cors_layer(&state.config.cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    if config.enabled {
        let cors = CorsLayer::new()
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(Any);

        if config.origins.iter().any(|o| o == "*") {
            cors.allow_origin(Any)
        } else {
            let parsed_origins: Vec<axum::http::HeaderValue> = config
                .origins
                .iter()
                .filter_map(|o| o.parse::<axum::http::HeaderValue>().ok())
                .collect();

            cors.allow_origin(parsed_origins)
        }
    } else {
        CorsLayer::permissive()
    }
}
