//! Bidirectional framed binding over WebSocket.

pub mod frames;
pub mod handler;

pub use handler::ws_handler;
