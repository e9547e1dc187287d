//! Kokoro text-to-speech over its OpenAI-compatible HTTP API.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use murmur_core::config::TtsConfig;
use murmur_providers::{AudioByteStream, SpeechSynthesisProvider};

const DEFAULT_BASE_URL: &str = "http://localhost:8880";

pub struct KokoroProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct VoicesResponse {
    #[serde(default)]
    voices: Vec<String>,
}

impl KokoroProvider {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: config.resolve_api_key(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

/// Body for `POST /v1/audio/speech`.
pub fn speech_request(text: &str, voice: &str) -> serde_json::Value {
    serde_json::json!({
        "model": "kokoro",
        "input": text,
        "voice": voice,
        "response_format": "wav",
        "stream": true,
    })
}

#[async_trait]
impl SpeechSynthesisProvider for KokoroProvider {
    fn id(&self) -> &str {
        "kokoro"
    }

    async fn synthesize(&self, text: &str, voice: &str) -> anyhow::Result<AudioByteStream> {
        debug!(voice, text_len = text.len(), "Starting TTS stream");

        let resp = self
            .authorized(self.client.post(format!("{}/v1/audio/speech", self.base_url)))
            .json(&speech_request(text, voice))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("TTS API error {status}: {body}");
        }

        Ok(Box::pin(resp.bytes_stream().map(|chunk| {
            chunk.map_err(|e| anyhow::anyhow!("TTS stream error: {e}"))
        })))
    }

    async fn voices(&self) -> anyhow::Result<Vec<String>> {
        let resp = self
            .authorized(self.client.get(format!("{}/v1/audio/voices", self.base_url)))
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("TTS voices request failed: {}", resp.status());
        }

        let body: VoicesResponse = resp.json().await?;
        Ok(body.voices)
    }
}
