mod handler;
mod message;

pub use handler::{establish, handle_text, ws_handler, WsQuery};
pub use message::{ClientMessage, OutboundFrame, PushKind, ServerMessage};
