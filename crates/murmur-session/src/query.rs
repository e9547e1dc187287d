//! Query stage: one language-model call for one committed prompt.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use murmur_core::config::{LlmConfig, SessionConfig};
use murmur_core::error::{MurmurError, Result};
use murmur_core::protocol::ServerEvent;
use murmur_core::types::Exchange;
use murmur_providers::{ChatMessage, CompletionRequest, LlmProvider};

use crate::coordinator::Command;
use crate::sink::TaskEmitter;

/// Earlier exchanges replayed to the model as context.
pub const MAX_HISTORY_EXCHANGES: usize = 20;

pub(crate) struct QueryJob {
    pub query_id: u64,
    pub prompt: String,
    pub config: Arc<SessionConfig>,
    pub history: Vec<Exchange>,
    pub llm: Arc<dyn LlmProvider>,
    pub emitter: TaskEmitter,
    pub commands: mpsc::UnboundedSender<Command>,
}

/// Why a prompt is not worth sending to the model, if it isn't.
pub fn rejection_reason(prompt: &str, prevalidate: bool) -> Option<&'static str> {
    if prompt.trim().is_empty() {
        return Some("empty prompt");
    }
    if prevalidate && !has_speech(prompt) {
        return Some("no speech in prompt");
    }
    None
}

/// Whisper marks non-speech as `[BLANK_AUDIO]` or `(music)`. Anything left
/// once those are removed has to contain a letter or digit.
fn has_speech(prompt: &str) -> bool {
    let mut depth = 0usize;
    for c in prompt.chars() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && c.is_alphanumeric() => return true,
            _ => {}
        }
    }
    false
}

pub fn build_request(config: &LlmConfig, history: &[Exchange], prompt: &str) -> CompletionRequest {
    let skip = history.len().saturating_sub(MAX_HISTORY_EXCHANGES);
    let mut messages = Vec::with_capacity((history.len() - skip) * 2 + 1);
    for exchange in &history[skip..] {
        messages.push(ChatMessage::user(&exchange.prompt));
        messages.push(ChatMessage::assistant(&exchange.response));
    }
    messages.push(ChatMessage::user(prompt));

    CompletionRequest {
        model: config.model.clone(),
        messages,
        system: Some(config.system_prompt.clone()).filter(|s| !s.trim().is_empty()),
        temperature: Some(config.temperature),
        repeat_penalty: Some(config.repeat_penalty),
        max_tokens: None,
    }
}

pub(crate) async fn run_query(job: QueryJob) -> Result<()> {
    let QueryJob {
        query_id,
        prompt,
        config,
        history,
        llm,
        emitter,
        commands,
    } = job;

    if let Some(reason) = rejection_reason(&prompt, config.app.prevalidate_prompt) {
        info!(%prompt, reason, "Prompt rejected");
        emitter.emit(ServerEvent::PromptRejected {
            query_id,
            prompt,
            reason: reason.into(),
        })?;
        return Ok(());
    }

    info!(%prompt, "Accepted prompt");
    emitter.emit(ServerEvent::PromptAccepted {
        query_id,
        prompt: prompt.clone(),
    })?;

    let request = build_request(&config.llm, &history, &prompt);
    let mut stream = match llm.stream(&request).await {
        Ok(stream) => stream,
        Err(e) => return fail(&emitter, query_id, e),
    };

    let mut response = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return fail(&emitter, query_id, e),
        };
        if let Some(delta) = chunk.delta {
            response.push_str(&delta);
            emitter.emit(ServerEvent::LlmOutput { query_id, delta })?;
        }
        if let Some(reason) = chunk.stop_reason {
            debug!(%reason, "Model stopped");
        }
    }
    drop(stream);

    emitter.emit(ServerEvent::LlmDone {
        query_id,
        prompt: prompt.clone(),
        response: response.clone(),
    })?;
    debug!(response_len = response.len(), "Query finished");

    commands
        .send(Command::ResponseReady {
            query_id,
            prompt,
            response,
        })
        .map_err(|_| MurmurError::Transport("session coordinator stopped".into()))
}

fn fail(emitter: &TaskEmitter, query_id: u64, err: anyhow::Error) -> Result<()> {
    warn!(error = %format!("{err:#}"), "LLM query failed");
    emitter.emit(ServerEvent::QueryFailed {
        query_id,
        message: format!("{err:#}"),
    })?;
    Err(MurmurError::provider(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prompts_rejected() {
        assert_eq!(rejection_reason("", false), Some("empty prompt"));
        assert_eq!(rejection_reason("  \t", true), Some("empty prompt"));
        assert_eq!(rejection_reason("hello", false), None);
    }

    #[test]
    fn test_prevalidation_strips_annotations() {
        assert_eq!(rejection_reason("[BLANK_AUDIO]", false), None);
        assert_eq!(
            rejection_reason("[BLANK_AUDIO]", true),
            Some("no speech in prompt")
        );
        assert_eq!(
            rejection_reason("(music) [NOISE] ...", true),
            Some("no speech in prompt")
        );
        assert_eq!(rejection_reason("(music) play it again", true), None);
        assert_eq!(rejection_reason("42", true), None);
    }

    #[test]
    fn test_request_replays_recent_history() {
        let config = LlmConfig::default();
        let history: Vec<Exchange> = (0..MAX_HISTORY_EXCHANGES + 2)
            .map(|i| Exchange {
                prompt: format!("q{i}"),
                response: format!("a{i}"),
            })
            .collect();

        let request = build_request(&config, &history, "latest");
        assert_eq!(request.model, config.model);
        assert_eq!(request.messages.len(), MAX_HISTORY_EXCHANGES * 2 + 1);
        assert_eq!(request.messages[0], ChatMessage::user("q2"));
        assert_eq!(request.messages[1], ChatMessage::assistant("a2"));
        assert_eq!(request.messages.last(), Some(&ChatMessage::user("latest")));
        assert_eq!(request.temperature, Some(config.temperature));
        assert_eq!(request.repeat_penalty, Some(config.repeat_penalty));
    }

    #[test]
    fn test_blank_system_prompt_omitted() {
        let config = LlmConfig {
            system_prompt: " ".into(),
            ..LlmConfig::default()
        };
        assert!(build_request(&config, &[], "hi").system.is_none());
    }
}
