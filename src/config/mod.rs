//! Configuration management for the voice controller

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Default command backend
const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Voices that sound like a composed British butler, best first
const DEFAULT_ASSISTANT_VOICES: &[&str] = &["fable", "onyx", "echo"];

/// Controller configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Command backend
    pub backend: BackendConfig,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Timing of controller-scheduled actions
    pub timing: TimingConfig,

    /// Path to data directory (credentials, settings)
    pub data_dir: PathBuf,
}

/// Command backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, without trailing slash
    pub base_url: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl BackendConfig {
    /// Backend at `base_url` with the default timeout
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn voice_command_url(&self) -> String {
        format!("{}/api/voice-command", self.base_url)
    }

    #[must_use]
    pub fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    #[must_use]
    pub fn tasks_url(&self) -> String {
        format!("{}/api/tasks", self.base_url)
    }

    #[must_use]
    pub fn task_url(&self, id: &str) -> String {
        format!("{}/api/tasks/{id}", self.base_url)
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable microphone and speaker engines
    pub enabled: bool,

    /// `OpenAI` API key for Whisper and TTS
    pub openai_api_key: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// Voice used when no assistant voice matches the catalog
    pub tts_voice: String,

    /// Preferred assistant voices, matched by name in order
    pub assistant_voices: Vec<String>,

    /// Silence after which the microphone stream ends itself
    pub idle_timeout: Duration,
}

/// Delays the controller and playback adapter schedule
#[derive(Debug, Clone, Copy)]
pub struct TimingConfig {
    /// Delay before an utterance starts, for voice catalog loading
    pub playback_delay: Duration,

    /// Delay before automatic re-listen after an `awaitingInput` reply
    pub relisten_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            playback_delay: Duration::from_millis(100),
            relisten_delay: Duration::from_millis(2000),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the backend URL is not an http(s) URL
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if the backend URL is not an http(s) URL
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        let fc = file::load_config_file();

        let base_url = std::env::var("JARVIS_API_URL")
            .ok()
            .or(fc.backend.url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "backend url must be http(s): {base_url}"
            )));
        }

        let mut backend = BackendConfig::new(base_url);
        if let Some(secs) = env_u64("JARVIS_API_TIMEOUT_SECS").or(fc.backend.timeout_secs) {
            backend.timeout = Duration::from_secs(secs);
        }

        let voice_enabled = if disable_voice {
            false
        } else {
            std::env::var("JARVIS_VOICE_ENABLED")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.voice.enabled)
                .unwrap_or(true)
        };

        let voice = VoiceConfig {
            enabled: voice_enabled,
            openai_api_key: std::env::var("OPENAI_API_KEY").ok().or(fc.api_keys.openai),
            stt_model: std::env::var("JARVIS_STT_MODEL")
                .ok()
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            tts_model: std::env::var("JARVIS_TTS_MODEL")
                .ok()
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| "tts-1".to_string()),
            tts_voice: std::env::var("JARVIS_TTS_VOICE")
                .ok()
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            assistant_voices: fc.voice.assistant_voices.unwrap_or_else(|| {
                DEFAULT_ASSISTANT_VOICES
                    .iter()
                    .map(ToString::to_string)
                    .collect()
            }),
            idle_timeout: Duration::from_secs(fc.voice.idle_timeout_secs.unwrap_or(8)),
        };

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
        }

        let defaults = TimingConfig::default();
        let timing = TimingConfig {
            playback_delay: fc
                .voice
                .playback_delay_ms
                .map_or(defaults.playback_delay, Duration::from_millis),
            relisten_delay: env_u64("JARVIS_RELISTEN_DELAY_MS")
                .or(fc.voice.relisten_delay_ms)
                .map_or(defaults.relisten_delay, Duration::from_millis),
        };

        // Determine data directory (~/.local/share/jarvis/voice on Linux)
        let data_dir = std::env::var("JARVIS_DATA_DIR").map_or_else(
            |_| {
                directories::ProjectDirs::from("dev", "jarvis", "jarvis")
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("voice"))
            },
            PathBuf::from,
        );

        // Ensure data dir exists
        std::fs::create_dir_all(&data_dir).ok();

        Ok(Self {
            backend,
            voice,
            timing,
            data_dir,
        })
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_urls() {
        let backend = BackendConfig::new("http://localhost:5000/");
        assert_eq!(backend.base_url, "http://localhost:5000");
        assert_eq!(
            backend.voice_command_url(),
            "http://localhost:5000/api/voice-command"
        );
        assert_eq!(backend.chat_url(), "http://localhost:5000/api/chat");
        assert_eq!(backend.tasks_url(), "http://localhost:5000/api/tasks");
        assert_eq!(backend.task_url("7"), "http://localhost:5000/api/tasks/7");
    }

    #[test]
    fn test_default_timing() {
        let timing = TimingConfig::default();
        assert_eq!(timing.playback_delay, Duration::from_millis(100));
        assert_eq!(timing.relisten_delay, Duration::from_secs(2));
    }
}
