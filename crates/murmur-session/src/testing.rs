//! Fake providers and event helpers for session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;

use murmur_core::config::WhisperConfig;
use murmur_core::protocol::ServerEvent;
use murmur_core::types::{AudioChunk, Exchange, Segment};
use murmur_providers::{
    AudioByteStream, AudioOutput, CompletionChunk, CompletionRequest, CompletionStream,
    LlmProvider, Providers, SegmentStream, SpeechSynthesisProvider, TranscriptionProvider,
};

use crate::ExchangeRecorder;

const WAIT: Duration = Duration::from_secs(2);

/// Segments are pushed by the test instead of derived from audio.
pub struct FakeTranscription {
    segments: Mutex<Option<mpsc::UnboundedReceiver<anyhow::Result<Segment>>>>,
}

impl FakeTranscription {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<anyhow::Result<Segment>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let fake = Self {
            segments: Mutex::new(Some(rx)),
        };
        (Arc::new(fake), tx)
    }
}

impl TranscriptionProvider for FakeTranscription {
    fn id(&self) -> &str {
        "fake-stt"
    }

    fn continuous_transcription(
        &self,
        audio: mpsc::UnboundedReceiver<AudioChunk>,
        _config: &WhisperConfig,
    ) -> SegmentStream {
        let Some(rx) = self.segments.lock().unwrap().take() else {
            return Box::pin(futures::stream::empty::<anyhow::Result<Segment>>());
        };
        // Keep the audio queue open for as long as the stream lives.
        Box::pin(UnboundedReceiverStream::new(rx).map(move |segment| {
            let _ = &audio;
            segment
        }))
    }
}

pub enum LlmReply {
    Text(Vec<String>),
    /// Never produces anything.
    Hang,
    /// One delta, then nothing. The sender is dropped with the stream.
    HangAfter(String, oneshot::Sender<()>),
    Fail(String),
}

/// Answers from a script, then with `"ok"`.
pub struct FakeLlm {
    script: Mutex<VecDeque<LlmReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FakeLlm {
    pub fn new(script: Vec<LlmReply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The last user message of every request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

fn delta(text: impl Into<String>) -> anyhow::Result<CompletionChunk> {
    Ok(CompletionChunk {
        delta: Some(text.into()),
        stop_reason: None,
    })
}

#[async_trait]
impl LlmProvider for FakeLlm {
    fn id(&self) -> &str {
        "fake-llm"
    }

    async fn stream(&self, request: &CompletionRequest) -> anyhow::Result<CompletionStream> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| LlmReply::Text(vec!["ok".into()]));

        let stream: CompletionStream = match reply {
            LlmReply::Text(deltas) => {
                let mut chunks: Vec<_> = deltas.into_iter().map(delta).collect();
                chunks.push(Ok(CompletionChunk {
                    delta: None,
                    stop_reason: Some("stop".into()),
                }));
                Box::pin(futures::stream::iter(chunks))
            }
            LlmReply::Hang => Box::pin(futures::stream::pending::<anyhow::Result<CompletionChunk>>()),
            LlmReply::HangAfter(text, guard) => Box::pin(
                futures::stream::iter(vec![delta(text)])
                    .chain(futures::stream::pending())
                    .map(move |chunk| {
                        let _ = &guard;
                        chunk
                    }),
            ),
            LlmReply::Fail(message) => anyhow::bail!(message),
        };
        Ok(stream)
    }
}

pub struct FakeTts {
    hang_first: bool,
    texts: Mutex<Vec<String>>,
    started: Notify,
}

impl FakeTts {
    pub fn new(hang_first: bool) -> Arc<Self> {
        Arc::new(Self {
            hang_first,
            texts: Mutex::new(Vec::new()),
            started: Notify::new(),
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub async fn started(&self) {
        tokio::time::timeout(WAIT, self.started.notified())
            .await
            .expect("synthesis never started");
    }
}

#[async_trait]
impl SpeechSynthesisProvider for FakeTts {
    fn id(&self) -> &str {
        "fake-tts"
    }

    async fn synthesize(&self, text: &str, _voice: &str) -> anyhow::Result<AudioByteStream> {
        let call = {
            let mut texts = self.texts.lock().unwrap();
            texts.push(text.to_string());
            texts.len()
        };
        self.started.notify_one();

        if self.hang_first && call == 1 {
            return Ok(Box::pin(futures::stream::pending::<anyhow::Result<bytes::Bytes>>()));
        }
        Ok(Box::pin(futures::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"RIFF")),
            Ok(bytes::Bytes::from_static(b"data")),
        ])))
    }

    async fn voices(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["af_bella".into()])
    }
}

#[derive(Default)]
pub struct FakeAudioOutput {
    stored: AtomicUsize,
}

#[async_trait]
impl AudioOutput for FakeAudioOutput {
    async fn store(&self, chat_id: &str, _wav: bytes::Bytes) -> anyhow::Result<String> {
        let n = self.stored.fetch_add(1, Ordering::SeqCst);
        Ok(format!("/audio/{chat_id}/{n}.wav"))
    }
}

#[derive(Default)]
pub struct FakeRecorder {
    exchanges: Mutex<Vec<(String, Exchange)>>,
}

impl FakeRecorder {
    pub fn exchanges(&self) -> Vec<(String, Exchange)> {
        self.exchanges.lock().unwrap().clone()
    }
}

impl ExchangeRecorder for FakeRecorder {
    fn record_exchange(&self, chat_id: &str, exchange: &Exchange) {
        self.exchanges
            .lock()
            .unwrap()
            .push((chat_id.to_string(), exchange.clone()));
    }
}

pub fn providers_with(
    transcription: Arc<FakeTranscription>,
    llm: Arc<FakeLlm>,
    tts: Option<Arc<FakeTts>>,
) -> Providers {
    Providers::new(
        transcription,
        llm,
        tts.map(|t| t as Arc<dyn SpeechSynthesisProvider>),
    )
}

/// The receiver resolves once the sender is dropped.
pub fn drop_signal() -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel();
    (rx, tx)
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Every event up to and including the first one of `kind`.
pub async fn collect_until(
    events: &mut mpsc::UnboundedReceiver<ServerEvent>,
    kind: &str,
) -> Vec<ServerEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let found = event.kind() == kind;
        seen.push(event);
        if found {
            return seen;
        }
    }
}

pub async fn wait_for(events: &mut mpsc::UnboundedReceiver<ServerEvent>, kind: &str) -> ServerEvent {
    let mut seen = collect_until(events, kind).await;
    seen.pop().unwrap()
}

pub async fn expect_quiet(events: &mut mpsc::UnboundedReceiver<ServerEvent>, window: Duration) {
    if let Ok(Some(event)) = tokio::time::timeout(window, events.recv()).await {
        panic!("unexpected event: {event:?}");
    }
}

pub fn drain(events: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut rest = Vec::new();
    while let Ok(event) = events.try_recv() {
        rest.push(event);
    }
    rest
}

pub fn query_id_of(event: &ServerEvent) -> Option<u64> {
    match event {
        ServerEvent::PromptAccepted { query_id, .. }
        | ServerEvent::PromptRejected { query_id, .. }
        | ServerEvent::LlmOutput { query_id, .. }
        | ServerEvent::LlmDone { query_id, .. }
        | ServerEvent::QueryFailed { query_id, .. } => Some(*query_id),
        _ => None,
    }
}
