//! Messages flowing into and out of the controller loop

use crate::Result;
use crate::dispatch::{CommandReply, TaskDraft};
use crate::model::{Task, TaskId, UserProfile};

/// Request from the presentation layer
#[derive(Debug)]
pub(crate) enum Command {
    ToggleListening,
    SendChat(String),
    SignIn(Option<UserProfile>),
    SignOut,
    CreateTask(TaskDraft),
    SetTaskCompleted(TaskId, bool),
    RenameTask(TaskId, String),
    DeleteTask(TaskId),
    RefreshTasks,
    Shutdown,
}

/// Where a dispatched utterance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Voice,
    Chat,
}

/// Context captured when a dispatch is issued
#[derive(Debug, Clone, Copy)]
pub(crate) struct Ticket {
    /// Session generation the dispatch belongs to
    pub epoch: u64,
    pub origin: Origin,
    /// Listening toggles seen before the dispatch
    pub toggles: u64,
}

/// Completion of work the controller spawned
#[derive(Debug)]
pub(crate) enum Internal {
    Dispatched {
        ticket: Ticket,
        outcome: Result<CommandReply>,
    },
    TasksFetched {
        fetch: u64,
        epoch: u64,
        outcome: Result<Vec<Task>>,
    },
    TaskCreated {
        epoch: u64,
        outcome: Result<Task>,
    },
    TaskSynced {
        epoch: u64,
        action: &'static str,
        outcome: Result<()>,
    },
    RelistenDue {
        token: u64,
    },
}

/// One-shot notification for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Microphone access refused; voice input disabled
    PermissionDenied,
    /// No recognition engine; typed chat only
    VoiceUnsupported,
    /// Capture stopped after an engine error; listening must be re-enabled
    CaptureError(String),
    /// The backend could not be reached; an apology was shown
    DispatchFailed(String),
    SpeechFailed(String),
    /// A task change from the task UI failed to reach the backend
    TaskSyncFailed(String),
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(
                f,
                "Microphone access denied. Grant microphone permission and restart voice input."
            ),
            Self::VoiceUnsupported => {
                write!(f, "Speech recognition is not available. Typed chat still works.")
            }
            Self::CaptureError(e) => write!(f, "Listening stopped: {e}"),
            Self::DispatchFailed(e) => write!(f, "Backend unavailable: {e}"),
            Self::SpeechFailed(e) => write!(f, "Speech output failed: {e}"),
            Self::TaskSyncFailed(e) => write!(f, "Task change not saved: {e}"),
        }
    }
}
