//! Continuous speech-to-text over an OpenAI-compatible transcription endpoint.
//!
//! Audio arrives as a live queue of PCM chunks. A [`Segmenter`] decides when
//! buffered audio is worth transcribing: periodically for live captions, when
//! the buffer grows past the segment limit, and at the end of each utterance.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use murmur_core::config::{TranscriptionConfig, WhisperConfig};
use murmur_core::types::{AudioChunk, Segment};
use murmur_providers::{SegmentStream, TranscriptionProvider};

const SAMPLE_RATE: u32 = 16_000;
const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2; // 2 bytes per i16 sample
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// What the segmenter wants transcribed next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentAction {
    /// Refresh the live caption with everything buffered so far.
    Partial(Vec<i16>),
    /// The buffer hit the segment limit; its words are settled.
    Complete(Vec<i16>),
    /// End of utterance; the remaining audio closes the prompt.
    Final(Vec<i16>),
}

/// Decides when buffered audio gets transcribed.
#[derive(Debug)]
pub struct Segmenter {
    buffer: Vec<i16>,
    since_partial: usize,
    partial_every: usize,
    max_segment: usize,
}

impl Segmenter {
    /// `partial_interval_ms == 0` disables live captions, `max_segment_ms == 0`
    /// lets an utterance grow without bound.
    pub fn new(sample_rate: u32, partial_interval_ms: u64, max_segment_ms: u64) -> Self {
        let samples = |ms: u64| (sample_rate as u64 * ms / 1000) as usize;
        Self {
            buffer: Vec::new(),
            since_partial: 0,
            partial_every: samples(partial_interval_ms),
            max_segment: match max_segment_ms {
                0 => usize::MAX,
                ms => samples(ms).max(1),
            },
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self::new(
            SAMPLE_RATE,
            config.partial_interval_ms(),
            config.max_segment_ms(),
        )
    }

    pub fn push(&mut self, chunk: AudioChunk) -> Option<SegmentAction> {
        match chunk {
            AudioChunk::Samples(samples) => {
                self.since_partial += samples.len();
                self.buffer.extend_from_slice(&samples);

                if self.buffer.len() >= self.max_segment {
                    self.since_partial = 0;
                    return Some(SegmentAction::Complete(std::mem::take(&mut self.buffer)));
                }
                if self.partial_every > 0 && self.since_partial >= self.partial_every {
                    self.since_partial = 0;
                    return Some(SegmentAction::Partial(self.buffer.clone()));
                }
                None
            }
            AudioChunk::SpeechEnd => {
                self.since_partial = 0;
                Some(SegmentAction::Final(std::mem::take(&mut self.buffer)))
            }
        }
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }
}

/// Turns one stretch of audio into text.
#[async_trait]
pub trait UtteranceTranscriber: Send + Sync {
    async fn transcribe(&self, pcm: &[i16], config: &WhisperConfig) -> Result<String>;
}

/// Drive a segmenter over a live audio queue, transcribing each action.
///
/// Ends when the audio sender is dropped. The first transcription failure is
/// yielded as an error and ends the stream.
pub fn segment_stream(
    transcriber: Arc<dyn UtteranceTranscriber>,
    segmenter: Segmenter,
    audio: mpsc::UnboundedReceiver<AudioChunk>,
    config: WhisperConfig,
) -> SegmentStream {
    let state = StreamState {
        transcriber,
        segmenter,
        audio,
        config,
    };

    Box::pin(futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            let chunk = state.audio.recv().await?;
            let Some(action) = state.segmenter.push(chunk) else {
                continue;
            };

            match state.transcribe(action).await {
                Ok(segment) => return Some((Ok(segment), Some(state))),
                Err(e) => {
                    warn!(%e, "Transcription failed, ending stream");
                    return Some((Err(e), None));
                }
            }
        }
    }))
}

struct StreamState {
    transcriber: Arc<dyn UtteranceTranscriber>,
    segmenter: Segmenter,
    audio: mpsc::UnboundedReceiver<AudioChunk>,
    config: WhisperConfig,
}

impl StreamState {
    async fn transcribe(&self, action: SegmentAction) -> Result<Segment> {
        match action {
            SegmentAction::Partial(pcm) => {
                let text = self.transcriber.transcribe(&pcm, &self.config).await?;
                Ok(Segment::partial(text))
            }
            SegmentAction::Complete(pcm) => {
                let text = self.transcriber.transcribe(&pcm, &self.config).await?;
                Ok(Segment::complete(text, false))
            }
            SegmentAction::Final(pcm) if pcm.is_empty() => Ok(Segment::end_of_utterance()),
            SegmentAction::Final(pcm) => {
                let text = self.transcriber.transcribe(&pcm, &self.config).await?;
                let segment = Segment::complete(text, true);
                if segment.words.is_empty() {
                    Ok(Segment::end_of_utterance())
                } else {
                    Ok(segment)
                }
            }
        }
    }
}

/// HTTP client for `/v1/audio/transcriptions`.
struct WhisperHttpClient {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[async_trait]
impl UtteranceTranscriber for WhisperHttpClient {
    async fn transcribe(&self, pcm: &[i16], config: &WhisperConfig) -> Result<String> {
        if pcm.is_empty() {
            return Ok(String::new());
        }

        let wav_data = pcm_to_wav(pcm, SAMPLE_RATE, 1, 16);
        let model = config.model.as_str();

        debug!(url = %self.url, model, wav_bytes = wav_data.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let form = reqwest::multipart::Form::new()
            .text("model", model.to_string())
            .text("language", config.language.code().to_string())
            .text("response_format", "text")
            .part("file", part);

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }
        let resp = request.send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error {status}: {body}");
        }

        let text = resp.text().await?;
        Ok(text.trim().to_string())
    }
}

/// Continuous transcription backed by a Whisper HTTP server.
pub struct WhisperHttpProvider {
    client: Arc<WhisperHttpClient>,
    config: TranscriptionConfig,
}

impl WhisperHttpProvider {
    pub fn new(config: TranscriptionConfig) -> Self {
        let base_url = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let client = WhisperHttpClient {
            url: transcription_url(base_url),
            api_key: config.resolve_api_key(),
            client: reqwest::Client::new(),
        };
        Self {
            client: Arc::new(client),
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.client.url
    }
}

impl TranscriptionProvider for WhisperHttpProvider {
    fn id(&self) -> &str {
        "whisper-http"
    }

    fn continuous_transcription(
        &self,
        audio: mpsc::UnboundedReceiver<AudioChunk>,
        config: &WhisperConfig,
    ) -> SegmentStream {
        segment_stream(
            self.client.clone(),
            Segmenter::from_config(&self.config),
            audio,
            config.clone(),
        )
    }
}

fn transcription_url(base_url: &str) -> String {
    format!("{base_url}/v1/audio/transcriptions")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::StreamExt;

    use super::*;

    /// Answers from a script and records the sample counts it was given.
    struct ScriptedTranscriber {
        replies: Mutex<Vec<Result<String>>>,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedTranscriber {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl UtteranceTranscriber for ScriptedTranscriber {
        async fn transcribe(&self, pcm: &[i16], _config: &WhisperConfig) -> Result<String> {
            self.seen.lock().unwrap().push(pcm.len());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    #[test]
    fn test_wav_header_generation() {
        let pcm = vec![0i16; 16000]; // 1 second at 16kHz
        let wav = pcm_to_wav(&pcm, 16000, 1, 16);

        // WAV header is 44 bytes
        assert_eq!(wav.len(), 44 + 16000 * 2);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[36..40], b"data");

        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 16000);
    }

    #[test]
    fn test_segmenter_partial_cadence() {
        // 100ms partials at 1kHz => every 100 samples
        let mut seg = Segmenter::new(1000, 100, 0);
        assert_eq!(seg.push(AudioChunk::Samples(vec![1; 60])), None);
        assert_eq!(
            seg.push(AudioChunk::Samples(vec![2; 60])),
            Some(SegmentAction::Partial([vec![1; 60], vec![2; 60]].concat()))
        );
        assert_eq!(seg.push(AudioChunk::Samples(vec![3; 10])), None);
        assert_eq!(seg.buffered_samples(), 130);
    }

    #[test]
    fn test_segmenter_complete_at_limit() {
        let mut seg = Segmenter::new(1000, 0, 100);
        assert_eq!(seg.push(AudioChunk::Samples(vec![0; 99])), None);
        assert_eq!(
            seg.push(AudioChunk::Samples(vec![0; 1])),
            Some(SegmentAction::Complete(vec![0; 100]))
        );
        assert_eq!(seg.buffered_samples(), 0);
    }

    #[test]
    fn test_segmenter_final_drains_buffer() {
        let mut seg = Segmenter::new(1000, 0, 0);
        seg.push(AudioChunk::Samples(vec![5; 3]));
        assert_eq!(
            seg.push(AudioChunk::SpeechEnd),
            Some(SegmentAction::Final(vec![5; 3]))
        );
        assert_eq!(seg.push(AudioChunk::SpeechEnd), Some(SegmentAction::Final(vec![])));
    }

    #[tokio::test]
    async fn test_stream_maps_actions_to_segments() {
        let transcriber = ScriptedTranscriber::new(vec![
            Ok("he".into()),
            Ok("hello".into()),
            Ok("world".into()),
        ]);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = segment_stream(
            transcriber.clone(),
            Segmenter::new(1000, 50, 200),
            rx,
            WhisperConfig::default(),
        );

        tx.send(AudioChunk::Samples(vec![0; 50])).unwrap(); // partial
        tx.send(AudioChunk::Samples(vec![0; 150])).unwrap(); // complete at 200
        tx.send(AudioChunk::Samples(vec![0; 10])).unwrap();
        tx.send(AudioChunk::SpeechEnd).unwrap(); // final
        drop(tx);

        let segments: Vec<Segment> = stream.by_ref().map(|s| s.unwrap()).collect().await;
        assert_eq!(
            segments,
            vec![
                Segment::partial("he"),
                Segment::complete("hello", false),
                Segment::complete("world", true),
            ]
        );
        assert_eq!(*transcriber.seen.lock().unwrap(), vec![50, 200, 10]);
    }

    #[tokio::test]
    async fn test_silent_final_has_no_words() {
        let transcriber = ScriptedTranscriber::new(vec![Ok("   ".into())]);
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = segment_stream(transcriber, Segmenter::new(1000, 0, 0), rx, WhisperConfig::default());

        tx.send(AudioChunk::Samples(vec![0; 20])).unwrap();
        tx.send(AudioChunk::SpeechEnd).unwrap();
        tx.send(AudioChunk::SpeechEnd).unwrap();
        drop(tx);

        let segments: Vec<Segment> = stream.map(|s| s.unwrap()).collect().await;
        assert_eq!(
            segments,
            vec![Segment::end_of_utterance(), Segment::end_of_utterance()]
        );
    }

    #[tokio::test]
    async fn test_failure_ends_stream() {
        let transcriber = ScriptedTranscriber::new(vec![Err(anyhow::anyhow!("503"))]);
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = segment_stream(transcriber, Segmenter::new(1000, 0, 0), rx, WhisperConfig::default());

        tx.send(AudioChunk::Samples(vec![0; 20])).unwrap();
        tx.send(AudioChunk::SpeechEnd).unwrap();
        tx.send(AudioChunk::Samples(vec![0; 20])).unwrap();
        tx.send(AudioChunk::SpeechEnd).unwrap();

        let results: Vec<Result<Segment>> = stream.collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }

    #[test]
    fn test_provider_url() {
        let provider = WhisperHttpProvider::new(TranscriptionConfig {
            base_url: Some("http://whisper.local:8000/".into()),
            ..Default::default()
        });
        assert_eq!(provider.url(), "http://whisper.local:8000/v1/audio/transcriptions");
        assert_eq!(provider.id(), "whisper-http");
    }
}
