//! HTTP handlers: health, voices, and chat history.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{info, warn};

use murmur_media::audio_store::is_valid_chat_id;

use crate::connection::handle_ws_connection;
use crate::state::GatewayState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(chat_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    if !is_valid_chat_id(&chat_id) {
        return invalid_chat_id(&chat_id);
    }
    ws.on_upgrade(move |socket| handle_ws_connection(state, socket, chat_id))
}

pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.live_sessions().await,
    }))
}

/// Voices offered by the TTS backend. Empty when there is none or it is down.
pub async fn voices(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let voices = match &state.providers.synthesis {
        Some(tts) => tts.voices().await.unwrap_or_else(|e| {
            warn!(provider = tts.id(), error = %e, "Failed to list voices");
            Vec::new()
        }),
        None => Vec::new(),
    };
    Json(json!({ "voices": voices }))
}

pub async fn list_chats(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({ "chats": state.chats.list() }))
}

pub async fn get_chat(
    Path(chat_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    match state.chats.get(&chat_id) {
        Some(chat) => Json(chat).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("chat not found: {chat_id}") })),
        )
            .into_response(),
    }
}

/// Forget a chat: end its live session, drop its history, delete its audio.
pub async fn delete_chat(
    Path(chat_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    if !is_valid_chat_id(&chat_id) {
        return invalid_chat_id(&chat_id);
    }

    if let Some(live) = state.take_session(&chat_id).await {
        live.handle.on_disconnect();
    }
    let existed = state.chats.remove(&chat_id);
    if let Err(e) = state.audio_store.remove_chat(&chat_id).await {
        warn!(chat_id = %chat_id, error = %e, "Failed to delete chat audio");
    }

    info!(chat_id = %chat_id, existed, "Chat deleted");
    Json(json!({ "id": chat_id })).into_response()
}

#[cfg(feature = "metrics")]
pub async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn invalid_chat_id(chat_id: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("invalid chat id: {chat_id:?}") })),
    )
        .into_response()
}
