//! Media pipeline: continuous STT, TTS, and synthesized audio storage.

pub mod audio_store;
pub mod stt;
pub mod tts;

pub use audio_store::AudioStore;
pub use stt::WhisperHttpProvider;
pub use tts::KokoroProvider;
