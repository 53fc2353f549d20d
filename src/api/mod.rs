//! API layer - HTTP endpoint handlers organized by domain.

mod health;
mod metrics;
mod push;
mod routes;

// Re-export all handlers for use in server/app.rs
pub use health::{health, stats};
pub use metrics::prometheus_metrics;
pub use push::{push_topic, push_user, PushResponse, PushTopicRequest, PushUserRequest};
pub use routes::api_routes;
