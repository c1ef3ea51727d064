//! Voice output settings broadcast
//!
//! The settings surface publishes; the controller subscribes. Last writer
//! wins and the controller only reads the value when it next speaks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::VoiceSettings;
use crate::{Error, Result};

/// File name inside the data directory
pub const SETTINGS_FILE: &str = "settings.json";

/// A single edit to the voice output settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingsChange {
    Enabled(bool),
    Rate(f32),
    Volume(f32),
}

impl SettingsChange {
    /// Parse a `name value` pair as typed at the console
    ///
    /// Names are `voice` (`on`/`off`), `speed` and `volume`.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an unknown name or a value that does not parse
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        let value = value.trim();
        let invalid = || Error::Config(format!("invalid value for {name}: {value:?}"));

        match name {
            "voice" => match value.to_ascii_lowercase().as_str() {
                "on" | "true" | "yes" => Ok(Self::Enabled(true)),
                "off" | "false" | "no" => Ok(Self::Enabled(false)),
                _ => Err(invalid()),
            },
            "speed" => value.parse().map(Self::Rate).map_err(|_| invalid()),
            "volume" => value.parse().map(Self::Volume).map_err(|_| invalid()),
            _ => Err(Error::Config(format!("unknown voice setting: {name}"))),
        }
    }

    /// `settings` with this change applied, clamped to the valid ranges
    #[must_use]
    pub fn apply_to(self, settings: VoiceSettings) -> VoiceSettings {
        match self {
            Self::Enabled(enabled) => VoiceSettings {
                enabled,
                ..settings
            },
            Self::Rate(rate) => VoiceSettings { rate, ..settings },
            Self::Volume(volume) => VoiceSettings { volume, ..settings },
        }
        .clamped()
    }
}

/// Process-wide channel for voice output settings
#[derive(Debug, Clone)]
pub struct SettingsBus {
    tx: Arc<watch::Sender<VoiceSettings>>,
    path: Option<PathBuf>,
}

impl SettingsBus {
    /// In-memory bus with no persistence
    #[must_use]
    pub fn new(initial: VoiceSettings) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            path: None,
        }
    }

    /// Bus seeded from `settings.json` in `data_dir`, persisting every publish
    #[must_use]
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let initial = read_settings(&path).unwrap_or_default();
        tracing::debug!(
            path = %path.display(),
            enabled = initial.enabled,
            rate = initial.rate,
            volume = initial.volume,
            "voice settings loaded"
        );

        let (tx, _) = watch::channel(initial);
        Self {
            tx: Arc::new(tx),
            path: Some(path),
        }
    }

    /// Publish new settings to every subscriber
    pub fn publish(&self, settings: VoiceSettings) {
        if let Some(path) = &self.path {
            if let Err(e) = write_settings(path, &settings) {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to persist voice settings"
                );
            }
        }
        self.tx.send_replace(settings);
        tracing::debug!(
            enabled = settings.enabled,
            rate = settings.rate,
            volume = settings.volume,
            "voice settings published"
        );
    }

    /// Apply one change to the latest settings and publish the result
    pub fn apply(&self, change: SettingsChange) -> VoiceSettings {
        let updated = change.apply_to(self.current());
        self.publish(updated);
        updated
    }

    /// Latest published settings
    #[must_use]
    pub fn current(&self) -> VoiceSettings {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<VoiceSettings> {
        self.tx.subscribe()
    }
}

fn read_settings(path: &Path) -> Option<VoiceSettings> {
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(settings) => Some(settings),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "invalid settings file, using defaults"
            );
            None
        }
    }
}

fn write_settings(path: &Path, settings: &VoiceSettings) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}
