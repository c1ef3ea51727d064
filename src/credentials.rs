//! Persistent credential storage
//!
//! Holds the bearer token and the last authenticated user profile across
//! restarts. The file is re-read on every lookup so a token written by the
//! authentication surface is picked up by the very next dispatch.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::UserProfile;
use crate::{Error, Result};

/// File name inside the data directory
pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<UserProfile>,
}

/// Key-value store for the bearer token and user profile
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store backed by `credentials.json` in `data_dir`
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CREDENTIALS_FILE))
    }

    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current bearer token, if any
    ///
    /// Read errors are logged and treated as "no token" so dispatch falls
    /// back to guest mode.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.read_lenient().token.filter(|t| !t.trim().is_empty())
    }

    /// Last authenticated user profile, if any
    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.read_lenient().user
    }

    /// Store the bearer token
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn set_token(&self, token: &str) -> Result<()> {
        let mut stored = self.read()?;
        stored.token = Some(token.to_string());
        self.write(&stored)
    }

    /// Store the user profile
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn set_user(&self, user: &UserProfile) -> Result<()> {
        let mut stored = self.read()?;
        stored.user = Some(user.clone());
        self.write(&stored)
    }

    /// Forget the user profile (sign-out), keeping the token
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn clear_user(&self) -> Result<()> {
        let mut stored = self.read()?;
        if stored.user.take().is_none() {
            return Ok(());
        }
        self.write(&stored)
    }

    /// Remove everything
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be removed
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self) -> Result<StoredCredentials> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(StoredCredentials::default()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                Error::Credentials(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(StoredCredentials::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_lenient(&self) -> StoredCredentials {
        self.read().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to read credentials, continuing as guest");
            StoredCredentials::default()
        })
    }

    fn write(&self, stored: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(stored)?;
        std::fs::write(&self.path, content)?;
        tracing::debug!(path = %self.path.display(), "credentials saved");
        Ok(())
    }
}
