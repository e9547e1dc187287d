//! WebSocket connection lifecycle: one voice session per connection.
//!
//! Binary frames are raw 16-bit little-endian PCM at 16 kHz. Text frames are
//! JSON [`ClientMessage`]s. Everything the session emits goes back as JSON
//! text frames, in order.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_core::protocol::{ClientMessage, ServerEvent};
use murmur_core::types::AudioChunk;
use murmur_session::{ClientSink, Session, SessionHandle};

use crate::state::GatewayState;

/// How long queued events get to flush once the session is gone.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle a new WebSocket connection for `chat_id`.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket, chat_id: String) {
    let conn_id = Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, chat_id = %chat_id, "New WebSocket connection");

    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    // A chat has at most one live session; the newest connection wins.
    if let Some(previous) = state.take_session(&chat_id).await {
        info!(chat_id = %chat_id, previous = %previous.conn_id, "Replacing existing session");
        previous.handle.on_disconnect();
        #[cfg(feature = "metrics")]
        crate::metrics::record_session_takeover();
    }

    let config = state.chats.resolve_config(&chat_id, &state.config.session);
    let history = state.chats.open(&chat_id, config.clone());

    let (sink, mut event_rx) = ClientSink::channel();
    let (mut ws_tx, mut ws_rx) = ws.split();

    let session = Session::new(chat_id.clone(), config, state.providers.clone())
        .with_audio_output(state.audio_store.clone())
        .with_recorder(state.chats.clone())
        .with_history(history)
        .start(sink.clone());
    let handle = match session {
        Ok(handle) => Arc::new(handle),
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "Failed to start session");
            let _ = ws_tx.send(Message::Close(None)).await;
            #[cfg(feature = "metrics")]
            crate::metrics::record_ws_disconnect();
            return;
        }
    };

    if let Some(raced) = state.attach_session(&chat_id, &conn_id, handle.clone()).await {
        raced.handle.on_disconnect();
    }

    // Spawn event sender task. It ends once every sender is gone.
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            #[cfg(feature = "metrics")]
            crate::metrics::record_event(event.kind());

            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(%e, kind = event.kind(), "Failed to encode event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    // Main read loop
    loop {
        tokio::select! {
            _ = handle.closed() => {
                debug!(conn_id = %conn_id, "Session closed, ending connection");
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(data))) => {
                    forward_audio(&handle, AudioChunk::from_le_bytes(&data));
                }
                Some(Ok(Message::Text(text))) => {
                    handle_text_frame(&handle, &sink, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn_id = %conn_id, "Client closed connection");
                    break;
                }
                Some(Ok(_)) => {
                    // Axum answers pings itself
                }
                Some(Err(e)) => {
                    info!(conn_id = %conn_id, %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    // Cleanup
    state.detach_session(&chat_id, &conn_id).await;
    handle.on_disconnect();
    drop(handle);
    drop(sink);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
    info!(conn_id = %conn_id, chat_id = %chat_id, "WebSocket connection closed");
}

fn forward_audio(handle: &SessionHandle, chunk: AudioChunk) {
    if let Err(e) = handle.on_audio_chunk(chunk) {
        debug!(%e, "Dropping audio");
    }
}

fn handle_text_frame(handle: &SessionHandle, sink: &ClientSink, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Prompt { text }) => {
            if let Err(e) = handle.on_client_prompt_submitted(text) {
                debug!(%e, "Dropping prompt");
            }
        }
        Ok(ClientMessage::SpeechEnd {}) => forward_audio(handle, AudioChunk::SpeechEnd),
        Ok(ClientMessage::Audio { samples }) => forward_audio(handle, AudioChunk::Samples(samples)),
        Err(e) => {
            warn!(%e, "Invalid frame received");
            let _ = sink.send(ServerEvent::Error {
                code: "parse_error".into(),
                message: format!("Invalid frame: {e}"),
            });
        }
    }
}
