//! HTTP client for the command backend

use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use super::{CommandDispatcher, CommandReply, ReplyBody, TaskDraft, TaskPatch};
use crate::config::BackendConfig;
use crate::model::{Task, TaskId};
use crate::{Error, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceCommandRequest<'a> {
    command: &'a str,
    session_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest<'a> {
    message: &'a str,
    user_id: Option<&'a str>,
    session_id: &'a str,
}

#[derive(Deserialize)]
struct TaskListBody {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Deserialize)]
struct TaskBody {
    task: Option<Task>,
}

/// Dispatcher backed by the backend's REST endpoints
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    /// HTTP client
    client: Client,
    /// Endpoint configuration
    backend: BackendConfig,
}

impl HttpDispatcher {
    /// Create a new dispatcher
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(backend: BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(backend.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, backend })
    }

    #[must_use]
    pub const fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    /// Attach the bearer credential when one is available
    fn authorize(req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Send a request, mapping transport errors and non-success status
    async fn exchange(req: RequestBuilder, what: &str) -> Result<Response> {
        let response = req.send().await.map_err(|e| {
            tracing::warn!(error = %e, what, "backend request failed");
            Error::DispatchFailed(format!("{what}: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, what, "backend error");
            return Err(Error::DispatchFailed(format!("{what}: {status} - {body}")));
        }

        Ok(response)
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T> {
        response.json().await.map_err(|e| {
            tracing::warn!(error = %e, what, "undecodable backend response");
            Error::DispatchFailed(format!("{what}: {e}"))
        })
    }
}

#[async_trait::async_trait]
impl CommandDispatcher for HttpDispatcher {
    async fn send_command(
        &self,
        command: &str,
        session_id: &str,
        token: Option<&str>,
    ) -> Result<CommandReply> {
        tracing::debug!(
            command,
            session_id,
            authenticated = token.is_some(),
            "dispatching voice command"
        );

        let req = self
            .client
            .post(self.backend.voice_command_url())
            .json(&VoiceCommandRequest {
                command,
                session_id,
            });
        let response = Self::exchange(Self::authorize(req, token), "voice command").await?;
        let body: ReplyBody = Self::decode(response, "voice command").await?;
        Ok(body.into())
    }

    async fn send_chat(
        &self,
        message: &str,
        user_id: Option<&str>,
        session_id: &str,
        token: Option<&str>,
    ) -> Result<CommandReply> {
        tracing::debug!(session_id, authenticated = token.is_some(), "dispatching chat message");

        let req = self.client.post(self.backend.chat_url()).json(&ChatRequest {
            message,
            user_id,
            session_id,
        });
        let response = Self::exchange(Self::authorize(req, token), "chat").await?;
        let body: ReplyBody = Self::decode(response, "chat").await?;
        Ok(body.into())
    }

    async fn fetch_tasks(&self, token: Option<&str>) -> Result<Vec<Task>> {
        let req = self.client.get(self.backend.tasks_url());
        let response = Self::exchange(Self::authorize(req, token), "list tasks").await?;
        let body: TaskListBody = Self::decode(response, "list tasks").await?;
        tracing::debug!(count = body.tasks.len(), "fetched tasks");
        Ok(body.tasks)
    }

    async fn create_task(&self, draft: &TaskDraft, token: Option<&str>) -> Result<Task> {
        let req = self.client.post(self.backend.tasks_url()).json(draft);
        let response = Self::exchange(Self::authorize(req, token), "create task").await?;
        let body: TaskBody = Self::decode(response, "create task").await?;
        body.task
            .ok_or_else(|| Error::DispatchFailed("create task: no task in response".to_string()))
    }

    async fn update_task(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
        token: Option<&str>,
    ) -> Result<Option<Task>> {
        let req = self.client.put(self.backend.task_url(id.as_str())).json(patch);
        let response = Self::exchange(Self::authorize(req, token), "update task").await?;
        let body: TaskBody = Self::decode(response, "update task").await?;
        Ok(body.task)
    }

    async fn delete_task(&self, id: &TaskId, token: Option<&str>) -> Result<()> {
        let req = self.client.delete(self.backend.task_url(id.as_str()));
        Self::exchange(Self::authorize(req, token), "delete task").await?;
        Ok(())
    }
}
