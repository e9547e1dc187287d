//! Synthesis stage: speak a finished answer.

use std::sync::Arc;

use bytes::BytesMut;
use futures::StreamExt;
use tracing::{info, warn};

use murmur_core::error::{MurmurError, Result};
use murmur_core::protocol::ServerEvent;
use murmur_providers::{AudioOutput, SpeechSynthesisProvider};

use crate::sink::TaskEmitter;

pub(crate) struct SynthesisJob {
    pub synthesis_id: u64,
    pub chat_id: String,
    pub text: String,
    pub voice: String,
    pub tts: Arc<dyn SpeechSynthesisProvider>,
    pub audio: Arc<dyn AudioOutput>,
    pub emitter: TaskEmitter,
}

pub(crate) async fn run_synthesis(job: SynthesisJob) -> Result<()> {
    let SynthesisJob {
        synthesis_id,
        chat_id,
        text,
        voice,
        tts,
        audio,
        emitter,
    } = job;

    let wav = match synthesize(tts.as_ref(), &text, &voice).await {
        Ok(wav) => wav,
        Err(e) => return fail(&emitter, synthesis_id, e),
    };

    let url = match audio.store(&chat_id, wav.freeze()).await {
        Ok(url) => url,
        Err(e) => return fail(&emitter, synthesis_id, e),
    };

    info!(%url, "Synthesized answer");
    emitter.emit(ServerEvent::TtsOutput { synthesis_id, url })
}

async fn synthesize(
    tts: &dyn SpeechSynthesisProvider,
    text: &str,
    voice: &str,
) -> anyhow::Result<BytesMut> {
    let mut stream = tts.synthesize(text, voice).await?;
    let mut wav = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        wav.extend_from_slice(&chunk?);
    }
    Ok(wav)
}

fn fail(emitter: &TaskEmitter, synthesis_id: u64, err: anyhow::Error) -> Result<()> {
    warn!(error = %format!("{err:#}"), "Speech synthesis failed");
    emitter.emit(ServerEvent::TtsFailed {
        synthesis_id,
        message: format!("{err:#}"),
    })?;
    Err(MurmurError::provider(err))
}
