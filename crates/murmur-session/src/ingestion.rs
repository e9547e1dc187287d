//! Speech ingestion stage.
//!
//! Consumes the transcription provider's segment stream for one session:
//! every segment is forwarded to the client as a live caption, settled words
//! are buffered, and a final segment turns the buffer into a prompt that is
//! handed to the coordinator.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use murmur_core::error::{MurmurError, Result};
use murmur_core::protocol::ServerEvent;
use murmur_core::types::Segment;
use murmur_providers::SegmentStream;

use crate::coordinator::Command;
use crate::sink::TaskEmitter;

/// Collects settled words until the utterance ends.
#[derive(Debug, Default)]
pub struct PromptAccumulator {
    words: Vec<String>,
}

impl PromptAccumulator {
    /// Feed one segment. Returns the committed prompt when the segment is
    /// final; an utterance with no settled words commits `""`.
    pub fn push(&mut self, segment: &Segment) -> Option<String> {
        if segment.complete {
            self.words.extend(segment.words.iter().cloned());
        }
        if !segment.is_final {
            return None;
        }
        let prompt = self.words.join(" ");
        self.words.clear();
        Some(prompt)
    }

    pub fn buffered_words(&self) -> usize {
        self.words.len()
    }
}

/// Run until the audio source closes, the provider fails, or the client goes
/// away. Words buffered when the stream ends are discarded.
pub(crate) async fn run_ingestion(
    mut segments: SegmentStream,
    emitter: TaskEmitter,
    commands: mpsc::UnboundedSender<Command>,
) -> Result<()> {
    let mut accumulator = PromptAccumulator::default();

    while let Some(item) = segments.next().await {
        let segment = match item {
            Ok(segment) => segment,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Transcription provider failed");
                emitter.emit(ServerEvent::TranscriptionFailed {
                    message: format!("{e:#}"),
                })?;
                return Err(MurmurError::provider(e));
            }
        };

        let committed = accumulator.push(&segment);
        emitter.emit(ServerEvent::SttOutput { segment })?;

        let command = match committed {
            Some(prompt) => {
                debug!(prompt = %prompt, "Utterance finalized");
                Command::PromptReady(prompt)
            }
            None => Command::SpeechActivity,
        };
        commands
            .send(command)
            .map_err(|_| MurmurError::Transport("session coordinator stopped".into()))?;
    }

    if accumulator.buffered_words() > 0 {
        debug!(
            words = accumulator.buffered_words(),
            "Dropping unfinished utterance"
        );
    }
    info!("Audio source closed, ingestion finished");
    Ok(())
}
