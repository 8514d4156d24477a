//! Colloquy - provider-agnostic conversational AI backend.
//!
//! Clients hold long-lived chat sessions, send user turns, and receive
//! streamed model completions over HTTP-SSE or a persistent WebSocket
//! channel.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
