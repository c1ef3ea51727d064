//! Conversation, task and voice-output data types
//!
//! Everything here is plain data shared between the controller, the
//! dispatcher wire format and the presentation snapshot.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Spoken or typed by the user
    User,
    /// Reply from the assistant
    Assistant,
    /// Controller-generated notice (task changes)
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// One entry in the conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Position-stable identifier, unique within a session
    pub id: u64,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Backend task identifier
///
/// The backend hands out integers from its file store and strings from its
/// database store; both are kept in string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Self(s),
            Raw::Signed(n) => Self(n.to_string()),
            Raw::Unsigned(n) => Self(n.to_string()),
        })
    }
}

/// A task in the client-side cache of the backend task list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, alias = "created_at", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "scheduled_for", deserialize_with = "lenient_timestamp")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a fresh, uncompleted task
    #[must_use]
    pub fn new(id: impl Into<TaskId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            completed: false,
            created_at: Some(Utc::now()),
            scheduled_for: None,
        }
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Parse an RFC 3339 or naive ISO-8601 timestamp (naive is taken as UTC)
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Unparseable timestamps become `None` instead of failing the whole payload
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(parse_timestamp))
}

/// One notification from the recognition engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptEvent {
    /// Partial hypothesis, replaced by the next event
    pub interim: String,
    /// Finalized text; empty when the event is interim-only
    pub final_text: String,
}

impl TranscriptEvent {
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            interim: text.into(),
            final_text: String::new(),
        }
    }

    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            interim: String::new(),
            final_text: text.into(),
        }
    }

    /// Whether the event carries any recognized speech (barge-in trigger)
    #[must_use]
    pub fn has_speech(&self) -> bool {
        !self.interim.trim().is_empty() || !self.final_text.trim().is_empty()
    }

    /// Trimmed final text, `None` when nothing was finalized
    #[must_use]
    pub fn finalized(&self) -> Option<&str> {
        let text = self.final_text.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// Voice output configuration, owned by the settings surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(rename = "voiceEnabled", default = "default_enabled")]
    pub enabled: bool,
    /// Speaking rate multiplier
    #[serde(rename = "voiceSpeed", default = "default_rate")]
    pub rate: f32,
    /// Output gain in `0.0..=1.0`
    #[serde(default = "default_volume")]
    pub volume: f32,
}

const fn default_enabled() -> bool {
    true
}

const fn default_rate() -> f32 {
    0.9
}

const fn default_volume() -> f32 {
    0.8
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            rate: default_rate(),
            volume: default_volume(),
        }
    }
}

impl VoiceSettings {
    /// Clamp rate and volume into ranges the synthesizer accepts
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            enabled: self.enabled,
            rate: self.rate.clamp(0.25, 4.0),
            volume: self.volume.clamp(0.0, 1.0),
        }
    }
}

/// Profile of the signed-in user, as stored by the authentication surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, deserialize_with = "optional_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl UserProfile {
    /// Label for display, `GUEST` when nothing identifies the user
    #[must_use]
    pub fn label(&self) -> &str {
        self.email
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("GUEST")
    }
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<TaskId>::deserialize(deserializer)?.map(|id| id.0))
}
