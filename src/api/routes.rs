use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::push::{push_topic, push_user};

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Push trigger endpoints
        .nest(
            "/api/v1",
            Router::new()
                .route("/push/user", post(push_user))
                .route("/push/topic", post(push_topic))
                .layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}
