// Shared components
pub mod auth;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod metrics;

// Domain layer (business logic)
pub mod notify;
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod sync;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
