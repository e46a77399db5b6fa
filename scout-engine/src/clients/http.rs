//! HTTP implementations of the collaborator interfaces

use super::{
    ConversationContext, OutboundDelivery, ReasoningClient, ReasoningOutcome, TranscriptionClient,
};
use async_trait::async_trait;
use scout_common::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const USER_AGENT: &str = concat!("scout/", env!("CARGO_PKG_VERSION"));

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Reasoning/policy collaborator over HTTP
///
/// `POST {base_url}/decide` with the conversation context; responds with a
/// ReasoningOutcome JSON body. Any transport or non-2xx failure maps to
/// `Error::ReasoningUnavailable` so the flush orchestrator can apply its
/// degradation policy.
pub struct HttpReasoningClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReasoningClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn decide(&self, context: &ConversationContext) -> Result<ReasoningOutcome> {
        let url = format!("{}/decide", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(context)
            .send()
            .await
            .map_err(|e| Error::ReasoningUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::ReasoningUnavailable(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .json::<ReasoningOutcome>()
            .await
            .map_err(|e| Error::ReasoningUnavailable(format!("Bad response body: {}", e)))
    }
}

/// Transcription collaborator over HTTP
///
/// `POST {base_url}/transcribe` with raw audio bytes. A 204 response means
/// the feature is disabled upstream and maps to `Ok(None)`.
pub struct HttpTranscriptionClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
}

impl HttpTranscriptionClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TranscriptionClient for HttpTranscriptionClient {
    async fn transcribe(&self, audio: &[u8]) -> Result<Option<String>> {
        let url = format!("{}/transcribe", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| Error::Collaborator(format!("Transcription request failed: {}", e)))?;

        if response.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(Error::Collaborator(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::Collaborator(format!("Bad transcription body: {}", e)))?;

        Ok(body.text)
    }
}

/// Outbound message delivery over HTTP
///
/// `POST {base_url}/send`. Delivery retries belong to the messaging
/// subsystem; a failure here is logged by callers, never surfaced to the
/// candidate.
pub struct HttpOutboundDelivery {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOutboundDelivery {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl OutboundDelivery for HttpOutboundDelivery {
    async fn send_message(
        &self,
        session_id: Uuid,
        channel: Option<&str>,
        text: &str,
    ) -> Result<()> {
        let url = format!("{}/send", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "sessionId": session_id,
                "channel": channel,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| Error::Collaborator(format!("Outbound send failed: {}", e)))?;

        if !response.status().is_success() {
            warn!(
                session_id = %session_id,
                status = %response.status(),
                "Outbound delivery returned non-success"
            );
            return Err(Error::Collaborator(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        Ok(())
    }
}
