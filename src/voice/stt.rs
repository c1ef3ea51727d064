//! Whisper transcription for the native recognizer
//!
//! Failures come back already classified as [`RecognitionError`]s: anything
//! that says the service could not be reached (transport errors, timeouts,
//! throttling, 5xx) is [`RecognitionError::Network`], the rest is `Other`.

use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};

use super::capture::RecognitionError;
use crate::{Error, Result};

const WHISPER_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

#[derive(serde::Deserialize)]
struct Transcription {
    text: String,
}

/// Whisper client turning one WAV utterance into text
#[derive(Debug, Clone)]
pub struct SpeechToText {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl SpeechToText {
    /// # Errors
    ///
    /// [`Error::Config`] when `api_key` is empty
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for Whisper".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: WHISPER_URL.to_string(),
            api_key,
            model,
        })
    }

    /// Send requests to another transcription endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Transcribe one utterance encoded as WAV
    ///
    /// # Errors
    ///
    /// [`RecognitionError::Network`] when the service is unreachable or
    /// temporarily unavailable, [`RecognitionError::Other`] when it rejects
    /// the request or answers with something unreadable
    pub async fn transcribe(&self, wav: &[u8]) -> std::result::Result<String, RecognitionError> {
        let file = Part::bytes(wav.to_vec())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| RecognitionError::Other(e.to_string()))?;
        let form = Form::new()
            .part("file", file)
            .text("model", self.model.clone());

        tracing::debug!(bytes = wav.len(), model = %self.model, "transcribing utterance");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "transcription request failed");
                RecognitionError::Network
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, %body, "transcription rejected");
            return Err(status_error(status, &body));
        }

        let transcription: Transcription = response
            .json()
            .await
            .map_err(|e| RecognitionError::Other(format!("unreadable transcription: {e}")))?;

        tracing::debug!(transcript = %transcription.text, "transcription complete");
        Ok(transcription.text)
    }
}

/// Classify a non-success transcription status
fn status_error(status: StatusCode, body: &str) -> RecognitionError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RecognitionError::Network
    } else {
        RecognitionError::Other(format!("transcription rejected ({status}): {body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let err = SpeechToText::new_whisper(String::new(), "whisper-1".to_string()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unavailable_service_is_network() {
        for status in [
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::BAD_GATEWAY,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
        ] {
            assert_eq!(status_error(status, ""), RecognitionError::Network, "{status}");
        }
    }

    #[test]
    fn test_rejected_request_is_other() {
        let RecognitionError::Other(reason) =
            status_error(StatusCode::UNAUTHORIZED, "invalid api key")
        else {
            panic!("expected Other");
        };
        assert!(reason.contains("401"));
        assert!(reason.contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let stt = SpeechToText::new_whisper("key".to_string(), "whisper-1".to_string())
            .unwrap()
            .with_endpoint(format!("http://{addr}/v1/audio/transcriptions"));

        assert_eq!(stt.transcribe(b"RIFF").await, Err(RecognitionError::Network));
    }
}
