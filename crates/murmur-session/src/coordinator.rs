//! The per-session coordinator loop.
//!
//! Owns [`SessionState`] exclusively. Stages never touch each other's task
//! handles; they post [`Command`]s and the loop applies them one at a time, so
//! `trigger` is a critical section per session without any shared locks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use murmur_core::config::SessionConfig;
use murmur_core::error::Result;
use murmur_core::protocol::ServerEvent;
use murmur_core::types::{Exchange, Stage};
use murmur_providers::{AudioOutput, Providers};

use crate::ExchangeRecorder;
use crate::query::{MAX_HISTORY_EXCHANGES, QueryJob, run_query};
use crate::session::SessionState;
use crate::sink::ClientSink;
use crate::synthesis::{SynthesisJob, run_synthesis};
use crate::task::TaskHandle;

#[derive(Debug)]
pub(crate) enum Command {
    /// The ingestion stage finalized an utterance.
    PromptReady(String),
    /// Typed input from the client.
    SubmitPrompt(String),
    /// A non-final segment went out; only re-arms the inactivity timer.
    SpeechActivity,
    /// A query finished streaming its answer.
    ResponseReady {
        query_id: u64,
        prompt: String,
        response: String,
    },
}

pub(crate) struct Coordinator {
    pub chat_id: String,
    pub config: Arc<SessionConfig>,
    pub providers: Providers,
    pub audio: Option<Arc<dyn AudioOutput>>,
    pub recorder: Option<Arc<dyn ExchangeRecorder>>,
    pub sink: ClientSink,
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: SessionState,
    pub ingestion: TaskHandle,
    pub shutdown: CancellationToken,
    pub next_task_id: u64,
}

impl Coordinator {
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        info!("Session started");

        let shutdown = self.shutdown.clone();
        let idle_timeout = match self.config.app.inactivity_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let mut idle_armed = false;

        loop {
            let idle = idle_timeout.filter(|_| idle_armed);

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = inbox.recv() => {
                    let Some(command) = command else { break };
                    idle_armed = true;
                    self.handle(command);
                }
                _ = sleep_or_forever(idle) => {
                    idle_armed = false;
                    if self.on_inactive().is_err() {
                        break;
                    }
                }
            }

            if self.sink.is_closed() {
                info!("Client channel closed");
                break;
            }
        }

        self.teardown();
    }

    pub fn handle(&mut self, command: Command) {
        match command {
            Command::PromptReady(prompt) => {
                self.state.set_pending_prompt(prompt);
                self.trigger();
            }
            Command::SubmitPrompt(prompt) => {
                debug!("Typed prompt submitted");
                self.state.set_pending_prompt(prompt);
                self.trigger();
            }
            Command::SpeechActivity => {}
            Command::ResponseReady {
                query_id,
                prompt,
                response,
            } => self.on_response(query_id, Exchange { prompt, response }),
        }
    }

    /// Supersede in-flight work with a query for the pending prompt.
    pub fn trigger(&mut self) {
        self.cancel_stale();

        let prompt = self.state.take_pending_prompt().unwrap_or_default();
        let history = self.state.history();
        let history = history[history.len().saturating_sub(MAX_HISTORY_EXCHANGES)..].to_vec();
        let task = self.next_task(Stage::Query);
        debug!(query_id = task.id(), "Starting query");

        task.spawn(run_query(QueryJob {
            query_id: task.id(),
            prompt,
            config: self.config.clone(),
            history,
            llm: self.providers.llm.clone(),
            emitter: task.emitter(self.sink.clone()),
            commands: self.commands.clone(),
        }));
        self.state.replace_query_task(Some(task));
    }

    /// Cancel live synthesis, then the live query, and clear both slots.
    fn cancel_stale(&mut self) {
        if let Some(task) = self.state.active_synthesis() {
            if task.cancel() {
                debug!(synthesis_id = task.id(), "Cancelled stale synthesis");
            }
        }
        self.state.replace_synthesis_task(None);

        if let Some(task) = self.state.active_query() {
            if task.cancel() {
                debug!(query_id = task.id(), "Cancelled stale query");
            }
        }
        self.state.replace_query_task(None);
    }

    fn on_response(&mut self, query_id: u64, exchange: Exchange) {
        self.state.record_exchange(exchange.clone());
        if let Some(recorder) = &self.recorder {
            recorder.record_exchange(&self.chat_id, &exchange);
        }

        if !self.state.is_current_query(query_id) {
            debug!(query_id, "Response from superseded query, not speaking it");
            return;
        }
        let (Some(tts), Some(audio)) = (self.providers.synthesis.clone(), self.audio.clone()) else {
            return;
        };
        if exchange.response.trim().is_empty() {
            return;
        }

        if let Some(task) = self.state.active_synthesis() {
            task.cancel();
        }
        let task = self.next_task(Stage::Synthesis);
        debug!(synthesis_id = task.id(), query_id, "Starting synthesis");

        task.spawn(run_synthesis(SynthesisJob {
            synthesis_id: task.id(),
            chat_id: self.chat_id.clone(),
            text: exchange.response,
            voice: self.config.tts.voice.clone(),
            tts,
            audio,
            emitter: task.emitter(self.sink.clone()),
        }));
        self.state.replace_synthesis_task(Some(task));
    }

    fn on_inactive(&mut self) -> Result<()> {
        info!("Session inactive, cancelling in-flight work");
        self.cancel_stale();
        self.sink.send(ServerEvent::Inactive {})
    }

    fn teardown(&mut self) {
        self.ingestion.cancel();
        self.cancel_stale();
        self.shutdown.cancel();
        info!("Session closed");
    }

    fn next_task(&mut self, stage: Stage) -> TaskHandle {
        let id = self.next_task_id;
        self.next_task_id += 1;
        TaskHandle::new(id, stage)
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
