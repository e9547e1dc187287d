//! Provider abstractions.
//!
//! The session core talks to its backends only through these traits:
//! [`TranscriptionProvider`] turns a live audio queue into segments,
//! [`LlmProvider`] streams a chat completion, and [`SpeechSynthesisProvider`]
//! turns an answer into audio. Concrete implementations are injected through
//! [`Providers`] when a session is built.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use murmur_core::config::WhisperConfig;
use murmur_core::types::{AudioChunk, Segment};

#[cfg(feature = "openai")]
pub mod openai;
pub mod sse;

/// Lazy, in-order, non-restartable segment sequence.
pub type SegmentStream = Pin<Box<dyn Stream<Item = anyhow::Result<Segment>> + Send>>;

pub type CompletionStream = Pin<Box<dyn Stream<Item = anyhow::Result<CompletionChunk>> + Send>>;

pub type AudioByteStream = Pin<Box<dyn Stream<Item = anyhow::Result<bytes::Bytes>> + Send>>;

/// A chat message sent to the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub temperature: Option<f64>,
    pub repeat_penalty: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// A streamed chunk from the LLM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub delta: Option<String>,
    pub stop_reason: Option<String>,
}

/// Continuous speech-to-text.
pub trait TranscriptionProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Transcribe a live audio queue.
    ///
    /// The stream ends when the audio sender is dropped. A backend failure is
    /// yielded once as an `Err` item, after which the stream ends.
    fn continuous_transcription(
        &self,
        audio: mpsc::UnboundedReceiver<AudioChunk>,
        config: &WhisperConfig,
    ) -> SegmentStream;
}

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "openai", "ollama").
    fn id(&self) -> &str;

    /// Stream a chat completion. Dropping the stream abandons the request.
    async fn stream(&self, request: &CompletionRequest) -> anyhow::Result<CompletionStream>;
}

/// Text-to-speech.
#[async_trait]
pub trait SpeechSynthesisProvider: Send + Sync {
    fn id(&self) -> &str;

    /// Synthesize `text` as WAV bytes. Dropping the stream abandons the request.
    async fn synthesize(&self, text: &str, voice: &str) -> anyhow::Result<AudioByteStream>;

    /// Voice identifiers accepted by [`synthesize`](Self::synthesize).
    async fn voices(&self) -> anyhow::Result<Vec<String>>;
}

/// Where synthesized audio ends up. Returns the URL the client fetches it from.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn store(&self, chat_id: &str, wav: bytes::Bytes) -> anyhow::Result<String>;
}

/// Backends injected into every session.
#[derive(Clone)]
pub struct Providers {
    pub transcription: Arc<dyn TranscriptionProvider>,
    pub llm: Arc<dyn LlmProvider>,
    pub synthesis: Option<Arc<dyn SpeechSynthesisProvider>>,
}

impl Providers {
    pub fn new(
        transcription: Arc<dyn TranscriptionProvider>,
        llm: Arc<dyn LlmProvider>,
        synthesis: Option<Arc<dyn SpeechSynthesisProvider>>,
    ) -> Self {
        Self {
            transcription,
            llm,
            synthesis,
        }
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("transcription", &self.transcription.id())
            .field("llm", &self.llm.id())
            .field("synthesis", &self.synthesis.as_ref().map(|s| s.id()))
            .finish()
    }
}
