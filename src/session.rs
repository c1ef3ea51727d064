//! Per-session conversation and task state
//!
//! A [`Session`] is created on sign-in and dropped on sign-out. Only the
//! controller holds one; presentation code sees [`Snapshot`]s.
//!
//! History and tasks are held behind `Arc` and copied on write, so
//! publishing a snapshot shares them instead of cloning.

use std::sync::Arc;

use chrono::{Local, Timelike, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::model::{Message, Role, Task, TaskId, UserProfile};

/// Length of the random suffix in a session identifier
const SESSION_SUFFIX_LEN: usize = 9;

/// Conversation context tied to one backend session identifier
#[derive(Debug)]
pub struct Session {
    id: String,
    user: Option<UserProfile>,
    messages: Arc<Vec<Message>>,
    tasks: Arc<Vec<Task>>,
    next_message_id: u64,
}

impl Session {
    /// Start a session with a freshly generated identifier
    #[must_use]
    pub fn new(user: Option<UserProfile>) -> Self {
        Self::with_id(generate_session_id(), user)
    }

    /// Start a session with a known identifier
    #[must_use]
    pub fn with_id(id: impl Into<String>, user: Option<UserProfile>) -> Self {
        let id = id.into();
        tracing::debug!(session_id = %id, "session created");
        Self {
            id,
            user,
            messages: Arc::default(),
            tasks: Arc::default(),
            next_message_id: 1,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identifier used for the typed-chat conversation
    #[must_use]
    pub fn chat_id(&self) -> String {
        format!("{}_chat", self.id)
    }

    #[must_use]
    pub const fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Shared handle on the history, for snapshots
    #[must_use]
    pub fn shared_messages(&self) -> Arc<Vec<Message>> {
        Arc::clone(&self.messages)
    }

    /// Shared handle on the task cache, for snapshots
    #[must_use]
    pub fn shared_tasks(&self) -> Arc<Vec<Task>> {
        Arc::clone(&self.tasks)
    }

    /// Append a message; history is never reordered or truncated
    pub fn push_message(&mut self, role: Role, text: impl Into<String>) -> &Message {
        let message = Message {
            id: self.next_message_id,
            role,
            text: text.into(),
            timestamp: Utc::now(),
        };
        self.next_message_id += 1;
        let messages = Arc::make_mut(&mut self.messages);
        messages.push(message);
        &messages[messages.len() - 1]
    }

    /// Insert a task or replace the one with the same id
    pub fn upsert_task(&mut self, task: Task) {
        let tasks = Arc::make_mut(&mut self.tasks);
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => tasks.push(task),
        }
    }

    /// Remove a task by id, returning whether it was present
    pub fn remove_task(&mut self, id: &TaskId) -> bool {
        if !self.tasks.iter().any(|t| &t.id == id) {
            return false;
        }
        Arc::make_mut(&mut self.tasks).retain(|t| &t.id != id);
        true
    }

    /// Set the completion flag of a task, returning whether it was present
    pub fn set_task_completed(&mut self, id: &TaskId, completed: bool) -> bool {
        let Some(task) = self.task_mut(id) else {
            return false;
        };
        task.completed = completed;
        true
    }

    /// Rename a task, returning whether it was present
    pub fn rename_task(&mut self, id: &TaskId, text: &str) -> bool {
        let Some(task) = self.task_mut(id) else {
            return false;
        };
        text.clone_into(&mut task.text);
        true
    }

    /// Replace the cache with the authoritative backend list
    pub fn replace_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = Arc::new(tasks);
    }

    fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if !self.tasks.iter().any(|t| &t.id == id) {
            return None;
        }
        Arc::make_mut(&mut self.tasks).iter_mut().find(|t| &t.id == id)
    }
}

/// Generate an identifier of the form `session_<millis>_<suffix>`
#[must_use]
pub fn generate_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("session_{}_{suffix}", Utc::now().timestamp_millis())
}

/// Pick a greeting appropriate for the local time of day
#[must_use]
pub fn greeting() -> String {
    let part = match Local::now().hour() {
        5..=11 => "morning",
        12..=16 => "afternoon",
        _ => "evening",
    };

    let greetings = [
        format!(
            "Good {part}, sir. JARVIS at your service. All systems operational. Try not to break anything today."
        ),
        format!(
            "Ah, good {part}, sir. I was just running some diagnostics. Turns out, I'm still smarter than your average toaster."
        ),
        format!(
            "Well, well, look who decided to show up. Good {part}, sir. Shall we save the world today, or just order pizza?"
        ),
        "Hello, sir. JARVIS reporting for duty. I promise to be only mildly sarcastic today."
            .to_string(),
    ];

    greetings
        .choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_default()
}

/// Coarse controller state, derived from the independent flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ControllerState {
    /// Not capturing, not speaking, nothing outstanding
    #[default]
    Idle,
    /// Capture active
    Listening,
    /// Playback active
    Speaking,
    /// At least one command awaiting a backend response
    Dispatching,
}

/// Availability of the voice capture modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum VoiceInput {
    #[default]
    Available,
    /// Microphone access refused; needs a fresh grant
    PermissionDenied,
    /// No recognition engine; typed chat only
    Unsupported,
}

/// Read-only view of controller state for presentation
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub state: ControllerState,
    pub listening: bool,
    pub speaking: bool,
    /// Current partial transcript
    pub interim: String,
    pub messages: Arc<Vec<Message>>,
    pub tasks: Arc<Vec<Task>>,
    /// `None` before sign-in and after sign-out
    pub session_id: Option<String>,
    pub user: Option<UserProfile>,
    pub voice_input: VoiceInput,
}

impl Snapshot {
    /// Trailing window of the conversation for display
    #[must_use]
    pub fn recent_messages(&self, count: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    /// Number of tasks not yet completed
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.tasks.iter().filter(|t| !t.completed).count()
    }
}
