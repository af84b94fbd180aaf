// ABOUTME: Wire-level REST client: one method per service endpoint, bearer auth.
// ABOUTME: Maps HTTP status onto the transport error taxonomy in one place.

use crate::activity::{Activity, ActivitySet};
use crate::error::TransportError;
use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Wire shape of `POST /conversations` and `POST /tokens/refresh`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    /// Service-issued token for this conversation. Present when starting
    /// with a secret; preferred over the configured credential.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, rename = "expires_in")]
    pub expires_in: Option<u64>,
}

/// Wire shape of a successful post: the server-assigned activity id.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceResponse {
    pub id: String,
}

/// A file staged for upload alongside a message activity.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AttachmentUpload {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, guessing the content type from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            filename,
            content_type,
            bytes,
        })
    }
}

/// Low-level HTTP client for the conversation REST endpoints.
///
/// Stateless apart from the connection pool: every call takes the token to
/// authenticate with, so the refresher can rotate tokens without touching
/// this layer.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `POST /conversations` — open a new conversation.
    pub async fn start_conversation(&self, auth: &str) -> Result<Conversation, TransportError> {
        let url = format!("{}/conversations", self.base_url);
        let response = self.http.post(&url).bearer_auth(auth).send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        response
            .json::<Conversation>()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    /// `POST /conversations/{id}/activities` — send one activity.
    pub async fn post_activity(
        &self,
        conversation_id: &str,
        token: &str,
        activity: &Activity,
    ) -> Result<ResourceResponse, TransportError> {
        let url = format!(
            "{}/conversations/{}/activities",
            self.base_url, conversation_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(activity)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        response
            .json::<ResourceResponse>()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    /// `POST /conversations/{id}/upload?userId=` — send an activity with
    /// binary attachments as a multipart form: an `activity` JSON part
    /// followed by one part per file.
    pub async fn upload_attachments(
        &self,
        conversation_id: &str,
        token: &str,
        user_id: &str,
        activity: &Activity,
        uploads: &[AttachmentUpload],
    ) -> Result<ResourceResponse, TransportError> {
        let url = format!("{}/conversations/{}/upload", self.base_url, conversation_id);
        let activity_json =
            serde_json::to_vec(activity).map_err(|e| TransportError::Protocol(e.to_string()))?;
        let mut form = Form::new().part(
            "activity",
            Part::bytes(activity_json)
                .mime_str("application/vnd.microsoft.activity")
                .map_err(|e| TransportError::Protocol(e.to_string()))?,
        );
        for upload in uploads {
            let part = Part::bytes(upload.bytes.clone())
                .file_name(upload.filename.clone())
                .mime_str(&upload.content_type)
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            form = form.part("file", part);
        }

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .query(&[("userId", user_id)])
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        response
            .json::<ResourceResponse>()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    /// `GET /conversations/{id}/activities?watermark=` — poll for activities
    /// newer than the watermark. The parameter is omitted on the first poll.
    pub async fn get_activities(
        &self,
        conversation_id: &str,
        token: &str,
        watermark: Option<&str>,
    ) -> Result<ActivitySet, TransportError> {
        let url = format!(
            "{}/conversations/{}/activities",
            self.base_url, conversation_id
        );
        let mut request = self.http.get(&url).bearer_auth(token);
        if let Some(watermark) = watermark {
            request = request.query(&[("watermark", watermark)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        response
            .json::<ActivitySet>()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }

    /// `POST /tokens/refresh` — exchange the current token for a fresh one.
    pub async fn refresh_token(&self, token: &str) -> Result<Conversation, TransportError> {
        let url = format!("{}/tokens/refresh", self.base_url);
        let response = self.http.post(&url).bearer_auth(token).send().await?;
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }
        response
            .json::<Conversation>()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

async fn error_for_status(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    if status == 403 {
        return TransportError::AuthRejected;
    }
    if (400..500).contains(&status) {
        let body = response.text().await.unwrap_or_default();
        return TransportError::Client { status, body };
    }
    TransportError::Server { status }
}
