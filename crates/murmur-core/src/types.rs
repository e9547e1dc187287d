use serde::{Deserialize, Serialize};

/// One unit of streamed transcription output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub text: String,

    /// The segment's words are settled and belong in the prompt.
    #[serde(default)]
    pub complete: bool,

    /// The utterance is over; accumulated words become the prompt.
    #[serde(default, rename = "final")]
    pub is_final: bool,

    #[serde(default)]
    pub words: Vec<String>,
}

impl Segment {
    /// A provisional caption that contributes nothing to the prompt.
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A settled segment; words are split from the text on whitespace.
    pub fn complete(text: impl Into<String>, is_final: bool) -> Self {
        let text = text.into();
        let words = text.split_whitespace().map(str::to_string).collect();
        Self {
            text,
            complete: true,
            is_final,
            words,
        }
    }

    /// End of utterance with nothing left to add.
    pub fn end_of_utterance() -> Self {
        Self {
            is_final: true,
            ..Self::default()
        }
    }
}

/// An item on a session's audio queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioChunk {
    /// 16-bit PCM, 16kHz mono.
    Samples(Vec<i16>),
    /// The client's voice activity detector saw the end of speech.
    SpeechEnd,
}

impl AudioChunk {
    /// Decode little-endian 16-bit PCM bytes. A trailing odd byte is dropped.
    pub fn from_le_bytes(raw: &[u8]) -> Self {
        let samples = raw
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect();
        Self::Samples(samples)
    }
}

/// Background stage kinds that run as cancellable tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingestion,
    Query,
    Synthesis,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Ingestion => write!(f, "ingestion"),
            Stage::Query => write!(f, "query"),
            Stage::Synthesis => write!(f, "synthesis"),
        }
    }
}

/// Lifecycle of a stage task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// A prompt and the answer it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub prompt: String,
    pub response: String,
}
