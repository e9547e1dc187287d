//! OpenAI-compatible Chat Completions provider.
//!
//! Streams completions via `/v1/chat/completions`. The same client serves
//! OpenAI itself and local OpenAI-compatible servers such as Ollama.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use murmur_core::config::{LlmProviderConfig, LlmStyle};

use crate::sse::{SseEvent, parse_sse_stream};
use crate::{ChatMessage, CompletionChunk, CompletionRequest, CompletionStream, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OpenAiProvider {
    pub base_url: String,
    pub style: LlmStyle,
    api_key: Option<String>,
    default_max_tokens: Option<u32>,
    provider_id: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn openai(base_url: Option<&str>, api_key: Option<String>) -> Self {
        Self::with_style(LlmStyle::OpenAi, base_url, api_key)
    }

    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::with_style(LlmStyle::Ollama, base_url, None)
    }

    pub fn from_config(config: &LlmProviderConfig) -> Self {
        let mut provider =
            Self::with_style(config.style, config.base_url.as_deref(), config.resolve_api_key());
        provider.default_max_tokens = config.max_tokens;
        provider
    }

    fn with_style(style: LlmStyle, base_url: Option<&str>, api_key: Option<String>) -> Self {
        let (default_url, id) = match style {
            LlmStyle::OpenAi => (OPENAI_BASE_URL, "openai"),
            LlmStyle::Ollama => (OLLAMA_BASE_URL, "ollama"),
        };
        Self {
            base_url: base_url.unwrap_or(default_url).trim_end_matches('/').to_string(),
            style,
            api_key,
            default_max_tokens: None,
            provider_id: id.into(),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &CompletionRequest) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(ref system) = request.system {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().cloned());

        OpenAiRequest {
            model: request.model.clone(),
            messages,
            stream: true,
            temperature: request.temperature,
            max_tokens: request.max_tokens.or(self.default_max_tokens),
            // OpenAI rejects unknown sampling fields; local servers honor it.
            repeat_penalty: match self.style {
                LlmStyle::Ollama => request.repeat_penalty,
                LlmStyle::OpenAi => None,
            },
        }
    }
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repeat_penalty: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Outcome of decoding one SSE `data:` payload.
#[derive(Debug, PartialEq)]
enum ParsedData {
    Done,
    Chunk(CompletionChunk),
    Skip,
}

fn parse_data(data: &str) -> ParsedData {
    let data = data.trim();
    // OpenAI terminates with "data: [DONE]"
    if data == "[DONE]" {
        return ParsedData::Done;
    }

    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            trace!(%e, data, "Failed to parse OpenAI chunk");
            return ParsedData::Skip;
        }
    };

    let Some(choice) = chunk.choices.into_iter().next() else {
        return ParsedData::Skip;
    };

    let delta = choice.delta.content.filter(|c| !c.is_empty());
    if delta.is_none() && choice.finish_reason.is_none() {
        return ParsedData::Skip;
    }

    ParsedData::Chunk(CompletionChunk {
        delta,
        stop_reason: choice.finish_reason,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn stream(&self, request: &CompletionRequest) -> anyhow::Result<CompletionStream> {
        let body = self.build_body(request);

        debug!(model = %body.model, base_url = %self.base_url, "Streaming OpenAI-compatible API");

        let mut req_builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json");

        match (&self.api_key, self.style) {
            (Some(key), _) => {
                req_builder = req_builder.header("authorization", format!("Bearer {key}"));
            }
            (None, LlmStyle::OpenAi) => {
                anyhow::bail!("OpenAI provider requires an API key");
            }
            (None, LlmStyle::Ollama) => {}
        }

        let response = req_builder.json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {status}: {body}");
        }

        Ok(completion_stream(parse_sse_stream(response)))
    }
}

/// Turn SSE events into completion chunks, ending at `[DONE]` or the first error.
fn completion_stream<S>(sse: S) -> CompletionStream
where
    S: Stream<Item = anyhow::Result<SseEvent>> + Send + 'static,
{
    Box::pin(futures::stream::unfold(
        Some(Box::pin(sse)),
        |state| async move {
            let mut sse = state?;
            loop {
                match sse.next().await {
                    Some(Ok(event)) => match parse_data(&event.data) {
                        ParsedData::Done => return None,
                        ParsedData::Chunk(chunk) => return Some((Ok(chunk), Some(sse))),
                        ParsedData::Skip => continue,
                    },
                    Some(Err(e)) => return Some((Err(e), None)),
                    None => return None,
                }
            }
        },
    ))
}
