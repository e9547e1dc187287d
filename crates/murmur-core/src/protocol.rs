//! Client wire protocol.
//!
//! The server pushes JSON objects tagged by `type`. The client sends JSON text
//! frames (tagged the same way) or binary frames of raw 16-bit PCM audio.

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::types::Segment;

/// Server -> client event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SessionReady {
        chat_id: String,
        config: SessionConfig,
    },

    /// Live caption, forwarded exactly as the transcriber produced it.
    SttOutput { segment: Segment },

    TranscriptionFailed { message: String },

    PromptAccepted { query_id: u64, prompt: String },

    PromptRejected {
        query_id: u64,
        prompt: String,
        reason: String,
    },

    LlmOutput { query_id: u64, delta: String },

    LlmDone {
        query_id: u64,
        prompt: String,
        response: String,
    },

    QueryFailed { query_id: u64, message: String },

    TtsOutput { synthesis_id: u64, url: String },

    TtsFailed { synthesis_id: u64, message: String },

    /// The inactivity timer fired and in-flight work was cancelled.
    Inactive {},

    Error { code: String, message: String },
}

impl ServerEvent {
    /// The `type` tag, for logging and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionReady { .. } => "session_ready",
            Self::SttOutput { .. } => "stt_output",
            Self::TranscriptionFailed { .. } => "transcription_failed",
            Self::PromptAccepted { .. } => "prompt_accepted",
            Self::PromptRejected { .. } => "prompt_rejected",
            Self::LlmOutput { .. } => "llm_output",
            Self::LlmDone { .. } => "llm_done",
            Self::QueryFailed { .. } => "query_failed",
            Self::TtsOutput { .. } => "tts_output",
            Self::TtsFailed { .. } => "tts_failed",
            Self::Inactive {} => "inactive",
            Self::Error { .. } => "error",
        }
    }
}

/// Client -> server text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Typed input; bypasses transcription.
    Prompt { text: String },

    /// End of the current utterance.
    SpeechEnd {},

    /// Audio as a JSON array, for clients that cannot send binary frames.
    Audio { samples: Vec<i16> },
}
