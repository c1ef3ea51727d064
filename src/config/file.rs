//! TOML configuration file loading
//!
//! Supports `~/.config/jarvis/voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct JarvisConfigFile {
    /// Command backend configuration
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Command backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL (e.g. "http://localhost:5000")
    pub url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output engines
    pub enabled: Option<bool>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// Default TTS voice (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// Preferred assistant voices, in order
    pub assistant_voices: Option<Vec<String>>,

    /// Delay before playback starts, in milliseconds
    pub playback_delay_ms: Option<u64>,

    /// Delay before automatic re-listen, in milliseconds
    pub relisten_delay_ms: Option<u64>,

    /// Silence after which the microphone stream ends itself, in seconds
    pub idle_timeout_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `JarvisConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> JarvisConfigFile {
    let Some(path) = config_file_path() else {
        return JarvisConfigFile::default();
    };

    if !path.exists() {
        return JarvisConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            JarvisConfigFile::default()
        }
    }
}

/// Read and parse one config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<JarvisConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/jarvis/voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    std::env::var("JARVIS_CONFIG").map_or_else(
        |_| {
            directories::BaseDirs::new().map(|d| {
                d.config_dir()
                    .join("jarvis")
                    .join("voice")
                    .join("config.toml")
            })
        },
        |p| Some(PathBuf::from(p)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let config: JarvisConfigFile = toml::from_str(
            r#"
            [backend]
            url = "https://jarvis.example.com"

            [voice]
            assistant_voices = ["fable", "onyx"]
            relisten_delay_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.backend.url.as_deref(), Some("https://jarvis.example.com"));
        assert!(config.backend.timeout_secs.is_none());
        assert_eq!(
            config.voice.assistant_voices,
            Some(vec!["fable".to_string(), "onyx".to_string()])
        );
        assert_eq!(config.voice.relisten_delay_ms, Some(1500));
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn test_read_config_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(matches!(read_config_file(&path), Err(crate::Error::Io(_))));

        std::fs::write(&path, "[backend\nurl = 1").unwrap();
        assert!(matches!(read_config_file(&path), Err(crate::Error::Toml(_))));

        std::fs::write(&path, "[voice]\nenabled = false").unwrap();
        let config = read_config_file(&path).unwrap();
        assert_eq!(config.voice.enabled, Some(false));
    }

    #[test]
    fn test_empty_file_is_default() {
        let config: JarvisConfigFile = toml::from_str("").unwrap();
        assert!(config.voice.enabled.is_none());
    }
}
