//! Connection and topic-subscription registries.

mod connections;
mod types;

pub use connections::{ConnectionRegistry, RegistryStats};
pub use types::{ConnectionHandle, ConnectionMeta};
