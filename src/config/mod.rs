mod settings;

pub use settings::{
    ApiConfig, JwtConfig, OtelConfig, ReconnectConfig, ServerConfig, Settings, WebSocketConfig,
};
