//! HTTP and WebSocket gateway for Murmur voice sessions.
//!
//! Each WebSocket on `/ws/{chat_id}` drives one session. The HTTP side serves
//! health, the TTS voice list, chat history, and the synthesized audio files.

pub mod chats;
pub mod connection;
pub mod handlers;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use chats::ChatRegistry;
pub use server::{build_router, start_gateway};
pub use state::GatewayState;
