//! Configuration loading and validation.
//!
//! Two layers: the server [`Config`] read once at startup, and the per-chat
//! [`SessionConfig`] that is fixed for the lifetime of a session.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MurmurError, Result};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers: Option<ProvidersConfig>,

    /// Where synthesized audio is written (default: `~/.murmur/tts_output`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_dir: Option<String>,

    /// Session settings used when no earlier chat exists.
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
}

fn default_port() -> u16 {
    8765
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "murmur_session=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

// --- Provider endpoints ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    /// Speech synthesis. When absent, answers are not spoken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsConfig>,
}

/// Wire dialect of an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmStyle {
    #[serde(rename = "openai")]
    OpenAi,
    #[default]
    Ollama,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    #[serde(default)]
    pub style: LlmStyle,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl LlmProviderConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

/// Speech-to-text endpoint (OpenAI-compatible `/v1/audio/transcriptions`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Audio between live-caption refreshes (default: 1000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_interval_ms: Option<u64>,

    /// Longest stretch of audio transcribed as one segment (default: 15000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_segment_ms: Option<u64>,
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn partial_interval_ms(&self) -> u64 {
        self.partial_interval_ms.unwrap_or(1_000)
    }

    pub fn max_segment_ms(&self) -> u64 {
        self.max_segment_ms.unwrap_or(15_000)
    }
}

/// Speech synthesis endpoint (OpenAI-compatible `/v1/audio/speech`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl TtsConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

// --- Per-session settings ---

/// Settings that hold for one chat. Immutable once the session starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub whisper: WhisperConfig,
    #[serde(default)]
    pub tts: VoiceConfig,
    #[serde(default)]
    pub app: AppConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub system_prompt: String,
    pub repeat_penalty: f64,
    pub temperature: f64,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1".into(),
            system_prompt: "You are a helpful voice assistant. Keep answers short and conversational."
                .into(),
            repeat_penalty: 1.1,
            temperature: 0.7,
            tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhisperModel {
    #[serde(rename = "medium.en")]
    MediumEn,
    #[default]
    #[serde(rename = "small.en")]
    SmallEn,
    #[serde(rename = "large-v3")]
    LargeV3,
}

impl WhisperModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MediumEn => "medium.en",
            Self::SmallEn => "small.en",
            Self::LargeV3 => "large-v3",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    En,
    Cs,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Cs => "cs",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhisperConfig {
    #[serde(default)]
    pub model: WhisperModel,
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsBackend {
    #[default]
    Kokoro,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub backend: TtsBackend,
    pub voice: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            backend: TtsBackend::Kokoro,
            voice: "af_bella".into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reject prompts that carry no speech (e.g. only `[BLANK_AUDIO]`).
    #[serde(default)]
    pub prevalidate_prompt: bool,

    /// Cancel in-flight work after this much silence from the session (0 = never).
    #[serde(default)]
    pub inactivity_timeout_ms: u64,
}

impl SessionConfig {
    /// Parse and validate a session config from JSON5 text.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: SessionConfig =
            json5::from_str(raw).map_err(|e| MurmurError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a session config file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&substitute_env_vars(&raw))
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.llm.model.trim().is_empty() {
            problems.push("llm.model must not be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            problems.push(format!(
                "llm.temperature must be within [0, 2], got {}",
                self.llm.temperature
            ));
        }
        if self.llm.repeat_penalty <= 0.0 {
            problems.push(format!(
                "llm.repeat_penalty must be positive, got {}",
                self.llm.repeat_penalty
            ));
        }
        if self.tts.voice.trim().is_empty() {
            problems.push("tts.voice must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(MurmurError::Config(problems.join("; ")))
        }
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config =
            json5::from_str(&substituted).map_err(|e| MurmurError::Config(e.to_string()))?;
        config.session.validate()?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway.as_ref().map(|g| g.port).unwrap_or_else(default_port)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.audio_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("tts_output"))
    }

    pub fn llm_provider(&self) -> LlmProviderConfig {
        self.providers
            .as_ref()
            .and_then(|p| p.llm.clone())
            .unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.providers
            .as_ref()
            .and_then(|p| p.transcription.clone())
            .unwrap_or_default()
    }

    pub fn tts(&self) -> Option<&TtsConfig> {
        self.providers.as_ref().and_then(|p| p.tts.as_ref())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let llm = self.llm_provider();
        if llm.style == LlmStyle::OpenAi && llm.resolve_api_key().is_none() {
            warnings.push("LLM provider 'openai' has no API key configured".to_string());
        }
        let transcription = self.transcription();
        if transcription.base_url.is_none() && transcription.resolve_api_key().is_none() {
            warnings.push("Transcription provider has no API key configured".to_string());
        }
        if self.tts().is_none() {
            warnings.push("No TTS provider configured; answers will not be spoken".to_string());
        }
        if !self.session.llm.tools.is_empty() {
            warnings.push("llm.tools is set but tool calling is not supported".to_string());
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
        }
        if let Err(e) = self.session.validate() {
            errors.push(e.to_string());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Murmur data: `~/.murmur/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".murmur")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_MURMUR_KEY", "sk-test-123") };
        let input = r#"{"key": "${TEST_MURMUR_KEY}", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("sk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_MURMUR_KEY") };
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 8765);
        assert_eq!(config.gateway_bind(), "0.0.0.0");
        assert_eq!(config.transcription().partial_interval_ms(), 1_000);
        assert!(config.tts().is_none());
        assert!(config.session.validate().is_ok());
    }

    #[test]
    fn test_session_config_from_source_shape() {
        let raw = r#"{
            llm: {
                model: "mistral",
                system_prompt: "Be brief.",
                repeat_penalty: 1.2,
                temperature: 0.3,
                tools: [],
            },
            whisper: { model: "large-v3", language: "cs" },
            tts: { backend: "kokoro", voice: "af_sky" },
            app: { prevalidate_prompt: true, inactivity_timeout_ms: 30000 },
        }"#;
        let config = SessionConfig::parse(raw).unwrap();
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.whisper.model, WhisperModel::LargeV3);
        assert_eq!(config.whisper.language, Language::Cs);
        assert_eq!(config.tts.voice, "af_sky");
        assert!(config.app.prevalidate_prompt);
        assert_eq!(config.app.inactivity_timeout_ms, 30_000);
    }

    #[test]
    fn test_unknown_whisper_model_rejected() {
        let raw = r#"{ whisper: { model: "tiny", language: "en" } }"#;
        let err = SessionConfig::parse(raw).unwrap_err();
        assert!(matches!(err, MurmurError::Config(_)));
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let mut config = SessionConfig::default();
        config.llm.model = " ".into();
        config.llm.temperature = 3.0;
        config.tts.voice = String::new();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("llm.model"), "got: {err}");
        assert!(err.contains("temperature"), "got: {err}");
        assert!(err.contains("tts.voice"), "got: {err}");
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let config = Config::load(Path::new("/nonexistent/murmur/config.json")).unwrap();
        assert_eq!(config.gateway_port(), 8765);
    }

    #[test]
    fn test_load_and_save_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                // comments are fine in JSON5
                gateway: { port: 9000 },
                providers: { llm: { style: "openai", api_key: "k" }, tts: { base_url: "http://tts" } },
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.gateway_port(), 9000);
        assert_eq!(config.llm_provider().style, LlmStyle::OpenAi);
        assert_eq!(config.tts().and_then(|t| t.base_url.as_deref()), Some("http://tts"));

        config.save(&path).unwrap();
        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded.gateway_port(), 9000);
    }

    #[test]
    fn test_validate_bad_port_errors() {
        let config = Config {
            gateway: Some(GatewayConfig { port: 0, bind: None }),
            ..Config::default()
        };
        let (warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("port")), "got: {errors:?}");
        assert!(
            warnings.iter().any(|w| w.contains("TTS")),
            "Expected a warning about missing TTS, got: {warnings:?}"
        );
    }
}
