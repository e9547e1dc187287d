//! Session state and lifecycle.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info_span, warn};

use murmur_core::config::SessionConfig;
use murmur_core::error::{MurmurError, Result};
use murmur_core::protocol::ServerEvent;
use murmur_core::types::{AudioChunk, Exchange, Stage};
use murmur_providers::{AudioOutput, Providers};

use crate::ExchangeRecorder;
use crate::coordinator::{Command, Coordinator};
use crate::ingestion::run_ingestion;
use crate::query::MAX_HISTORY_EXCHANGES;
use crate::sink::ClientSink;
use crate::task::TaskHandle;

/// Mutable per-conversation state, owned by the coordinator loop.
#[derive(Debug, Default)]
pub struct SessionState {
    pending_prompt: Option<String>,
    active_query: Option<TaskHandle>,
    active_synthesis: Option<TaskHandle>,
    history: Vec<Exchange>,
}

impl SessionState {
    /// Seed the history, keeping only the newest exchanges.
    pub fn with_history(mut history: Vec<Exchange>) -> Self {
        let excess = history.len().saturating_sub(MAX_HISTORY_EXCHANGES);
        history.drain(..excess);
        Self {
            history,
            ..Self::default()
        }
    }

    pub fn pending_prompt(&self) -> Option<&str> {
        self.pending_prompt.as_deref()
    }

    pub fn set_pending_prompt(&mut self, text: String) {
        self.pending_prompt = Some(text);
    }

    pub fn take_pending_prompt(&mut self) -> Option<String> {
        self.pending_prompt.take()
    }

    /// The query task, unless it already reached a terminal state.
    pub fn active_query(&self) -> Option<&TaskHandle> {
        self.active_query.as_ref().filter(|t| !t.is_terminal())
    }

    pub fn active_synthesis(&self) -> Option<&TaskHandle> {
        self.active_synthesis.as_ref().filter(|t| !t.is_terminal())
    }

    /// Whether `query_id` is the most recently started query.
    pub fn is_current_query(&self, query_id: u64) -> bool {
        self.active_query.as_ref().is_some_and(|t| t.id() == query_id)
    }

    /// Swap the query slot. The outgoing task must already be cancelled or
    /// finished.
    pub fn replace_query_task(&mut self, task: Option<TaskHandle>) -> Option<TaskHandle> {
        replace_slot(&mut self.active_query, task)
    }

    pub fn replace_synthesis_task(&mut self, task: Option<TaskHandle>) -> Option<TaskHandle> {
        replace_slot(&mut self.active_synthesis, task)
    }

    /// The newest exchanges, oldest first. Never more than
    /// [`MAX_HISTORY_EXCHANGES`].
    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    pub fn record_exchange(&mut self, exchange: Exchange) {
        if self.history.len() == MAX_HISTORY_EXCHANGES {
            self.history.remove(0);
        }
        self.history.push(exchange);
    }
}

fn replace_slot(slot: &mut Option<TaskHandle>, task: Option<TaskHandle>) -> Option<TaskHandle> {
    let old = std::mem::replace(slot, task);
    if let Some(old) = &old {
        debug_assert!(
            old.is_terminal(),
            "replaced live {} task {} without cancelling it",
            old.stage(),
            old.id()
        );
        if old.cancel() {
            warn!(task_id = old.id(), stage = %old.stage(), "Replaced a live task, cancelled it");
        }
    }
    old
}

/// Everything a session needs before it starts.
pub struct Session {
    chat_id: String,
    config: SessionConfig,
    providers: Providers,
    audio: Option<Arc<dyn AudioOutput>>,
    recorder: Option<Arc<dyn ExchangeRecorder>>,
    history: Vec<Exchange>,
}

impl Session {
    pub fn new(chat_id: impl Into<String>, config: SessionConfig, providers: Providers) -> Self {
        Self {
            chat_id: chat_id.into(),
            config,
            providers,
            audio: None,
            recorder: None,
            history: Vec::new(),
        }
    }

    /// Where synthesized answers are stored. Without one, answers are not spoken.
    pub fn with_audio_output(mut self, audio: Arc<dyn AudioOutput>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ExchangeRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Earlier exchanges of a resumed chat, replayed to the model.
    pub fn with_history(mut self, history: Vec<Exchange>) -> Self {
        self.history = history;
        self
    }

    /// Announce the session on `sink` and start its ingestion stage and
    /// coordinator loop.
    ///
    /// Fails if the client channel is already closed.
    pub fn start(self, sink: ClientSink) -> Result<SessionHandle> {
        let span = info_span!("session", chat_id = %self.chat_id);
        let _entered = span.enter();

        sink.send(ServerEvent::SessionReady {
            chat_id: self.chat_id.clone(),
            config: self.config.clone(),
        })
        .map_err(|e| {
            MurmurError::Session(format!("cannot open event sink for {}: {e}", self.chat_id))
        })?;

        let config = Arc::new(self.config);
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let ingestion = TaskHandle::new(0, Stage::Ingestion);
        let segments = self
            .providers
            .transcription
            .continuous_transcription(audio_rx, &config.whisper);
        ingestion.spawn(run_ingestion(
            segments,
            ingestion.emitter(sink.clone()),
            commands_tx.clone(),
        ));

        let coordinator = Coordinator {
            chat_id: self.chat_id.clone(),
            config,
            providers: self.providers,
            audio: self.audio,
            recorder: self.recorder,
            sink,
            commands: commands_tx.clone(),
            state: SessionState::with_history(self.history),
            ingestion: ingestion.clone(),
            shutdown: shutdown.clone(),
            next_task_id: 1,
        };
        let join = tokio::spawn(coordinator.run(commands_rx).instrument(span.clone()));

        Ok(SessionHandle {
            chat_id: self.chat_id,
            audio: audio_tx,
            commands: commands_tx,
            ingestion,
            shutdown,
            join: Some(join),
        })
    }
}

/// The transport's handle on a running session. Dropping it disconnects.
pub struct SessionHandle {
    chat_id: String,
    audio: mpsc::UnboundedSender<AudioChunk>,
    commands: mpsc::UnboundedSender<Command>,
    ingestion: TaskHandle,
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Queue audio for the ingestion stage.
    pub fn on_audio_chunk(&self, chunk: AudioChunk) -> Result<()> {
        self.audio
            .send(chunk)
            .map_err(|_| MurmurError::Transport("ingestion stopped".into()))
    }

    /// Typed input: becomes the pending prompt and triggers a query directly.
    pub fn on_client_prompt_submitted(&self, text: impl Into<String>) -> Result<()> {
        self.commands
            .send(Command::SubmitPrompt(text.into()))
            .map_err(|_| MurmurError::Transport("session closed".into()))
    }

    /// Stop ingestion at once and tear the session down. Idempotent.
    pub fn on_disconnect(&self) {
        self.ingestion.cancel();
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once the session starts tearing down, for whatever reason.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Tear down and wait until every stage has been cancelled.
    pub async fn close(mut self) {
        self.on_disconnect();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.on_disconnect();
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("chat_id", &self.chat_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
