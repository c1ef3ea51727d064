//! Command dispatch to the remote command-processing backend
//!
//! The controller talks to the backend only through [`CommandDispatcher`].
//! Replies are normalized into a [`CommandReply`] so the controller never
//! sees wire flags.

mod http;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

pub use http::HttpDispatcher;

use crate::Result;
use crate::model::{Task, TaskId};

/// A request/response exchange with the command backend
///
/// Every method is a single best-effort attempt; failures surface as
/// [`crate::Error::DispatchFailed`] and are never retried here.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    /// Send a finalized voice transcript
    async fn send_command(
        &self,
        command: &str,
        session_id: &str,
        token: Option<&str>,
    ) -> Result<CommandReply>;

    /// Send a typed chat message
    async fn send_chat(
        &self,
        message: &str,
        user_id: Option<&str>,
        session_id: &str,
        token: Option<&str>,
    ) -> Result<CommandReply>;

    /// Fetch the authoritative task list
    async fn fetch_tasks(&self, token: Option<&str>) -> Result<Vec<Task>>;

    /// Create a task, returning it with its backend id
    async fn create_task(&self, draft: &TaskDraft, token: Option<&str>) -> Result<Task>;

    /// Apply a partial update to a task
    async fn update_task(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
        token: Option<&str>,
    ) -> Result<Option<Task>>;

    /// Delete a task
    async fn delete_task(&self, id: &TaskId, token: Option<&str>) -> Result<()>;
}

/// Task mutation announced by the backend alongside a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskDirective {
    Created(Task),
    Deleted(TaskId),
    Completed(TaskId),
    Updated { id: TaskId, task: Option<Task> },
}

impl TaskDirective {
    /// System message announcing the change
    #[must_use]
    pub fn notice(&self) -> String {
        match self {
            Self::Created(task) => match task.scheduled_for {
                Some(at) => format!(
                    "Task created: {} (scheduled for {})",
                    task.text,
                    format_local(at)
                ),
                None => format!("Task created: {}", task.text),
            },
            Self::Deleted(_) => "Task deleted".to_string(),
            Self::Completed(_) => "Task completed".to_string(),
            Self::Updated { .. } => "Task updated".to_string(),
        }
    }
}

fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%b %-d, %Y %-I:%M %p")
        .to_string()
}

/// Normalized backend reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReply {
    /// Reply utterance, possibly empty
    pub text: String,
    pub directives: Vec<TaskDirective>,
    /// The backend expects a follow-up utterance
    pub awaiting_input: bool,
}

impl CommandReply {
    /// Reply with text only
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Text worth speaking, `None` when the reply is blank
    #[must_use]
    pub fn spoken_text(&self) -> Option<&str> {
        let text = self.text.trim();
        (!text.is_empty()).then_some(text)
    }
}

/// Reply body shared by the voice and chat endpoints
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct ReplyBody {
    response: Option<String>,
    task: Option<Task>,
    task_created: bool,
    task_deleted: bool,
    task_completed: bool,
    task_updated: bool,
    task_id: Option<TaskId>,
    awaiting_input: bool,
}

impl From<ReplyBody> for CommandReply {
    fn from(body: ReplyBody) -> Self {
        let target = body
            .task_id
            .clone()
            .or_else(|| body.task.as_ref().map(|t| t.id.clone()));
        let mut directives = Vec::new();

        if body.task_created {
            match body.task.clone() {
                Some(task) => directives.push(TaskDirective::Created(task)),
                None => tracing::warn!("taskCreated without task payload, ignoring"),
            }
        }

        if body.task_deleted {
            push_targeted(&mut directives, target.as_ref(), TaskDirective::Deleted);
        }
        if body.task_completed {
            push_targeted(&mut directives, target.as_ref(), TaskDirective::Completed);
        }

        if body.task_updated {
            match target {
                Some(id) => directives.push(TaskDirective::Updated {
                    id,
                    task: body.task.filter(|_| !body.task_created),
                }),
                None => tracing::warn!("taskUpdated without taskId, ignoring"),
            }
        }

        Self {
            text: body.response.unwrap_or_default(),
            directives,
            awaiting_input: body.awaiting_input,
        }
    }
}

fn push_targeted(
    directives: &mut Vec<TaskDirective>,
    target: Option<&TaskId>,
    make: impl FnOnce(TaskId) -> TaskDirective,
) {
    match target {
        Some(id) => directives.push(make(id.clone())),
        None => tracing::warn!("task directive without taskId, ignoring"),
    }
}

/// New task submitted from the task UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub text: String,
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// Partial task update; absent fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> CommandReply {
        serde_json::from_str::<ReplyBody>(json).unwrap().into()
    }

    #[test]
    fn test_task_created_reply() {
        let reply = parse(
            r#"{
                "response": "Reminder set, sir.",
                "task": {"id": "t1", "text": "call mom"},
                "taskCreated": true,
                "timestamp": "2024-05-01T10:00:00"
            }"#,
        );

        assert_eq!(reply.text, "Reminder set, sir.");
        assert!(!reply.awaiting_input);
        assert_eq!(reply.directives.len(), 1);
        let TaskDirective::Created(task) = &reply.directives[0] else {
            panic!("expected created directive");
        };
        assert_eq!(task.id, TaskId::new("t1"));
        assert_eq!(reply.directives[0].notice(), "Task created: call mom");
    }

    #[test]
    fn test_delete_and_complete_use_task_id() {
        let reply = parse(r#"{"response": "Done.", "taskDeleted": true, "taskId": 4}"#);
        assert_eq!(reply.directives, vec![TaskDirective::Deleted(TaskId::new("4"))]);

        let reply = parse(r#"{"response": "Done.", "taskCompleted": true, "taskId": "x9"}"#);
        assert_eq!(reply.directives, vec![TaskDirective::Completed(TaskId::new("x9"))]);
        assert_eq!(reply.directives[0].notice(), "Task completed");
    }

    #[test]
    fn test_flags_without_payload_are_dropped() {
        let reply = parse(r#"{"response": "Hmm.", "taskCreated": true, "taskDeleted": true}"#);
        assert!(reply.directives.is_empty());
    }

    #[test]
    fn test_awaiting_input_and_missing_response() {
        let reply = parse(r#"{"awaitingInput": true, "inputType": "taskSelection"}"#);
        assert!(reply.awaiting_input);
        assert_eq!(reply.text, "");
        assert!(reply.spoken_text().is_none());

        let reply = parse(r#"{"response": null}"#);
        assert_eq!(reply, CommandReply::default());
    }

    #[test]
    fn test_updated_carries_task_when_present() {
        let reply = parse(
            r#"{"response": "Renamed.", "taskUpdated": true, "task": {"id": 2, "text": "new"}}"#,
        );
        let TaskDirective::Updated { id, task } = &reply.directives[0] else {
            panic!("expected updated directive");
        };
        assert_eq!(id.as_str(), "2");
        assert_eq!(task.as_ref().unwrap().text, "new");
        assert_eq!(reply.directives[0].notice(), "Task updated");
    }

    #[test]
    fn test_patch_serializes_only_present_fields() {
        let patch = TaskPatch {
            completed: Some(true),
            text: None,
        };
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"completed":true}"#);

        let draft = TaskDraft {
            text: "call mom".to_string(),
            scheduled_for: None,
        };
        assert_eq!(
            serde_json::to_string(&draft).unwrap(),
            r#"{"text":"call mom","scheduledFor":null}"#
        );
    }
}
