//! Gmail API v1 — list unread messages, fetch full payloads, mark read.

use async_trait::async_trait;
use serde::Deserialize;

use super::ApiError;
use crate::pipeline::MailSource;

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStub {
    id: String,
}

/// A full-format Gmail message: id plus the root MIME part.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

/// One node of the MIME part tree. The root node carries the message
/// headers; leaf nodes carry base64url body data.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Thin Gmail client bound to one access token for the duration of a run.
pub struct GmailClient {
    client: reqwest::Client,
    access_token: String,
}

impl GmailClient {
    pub fn new(access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
        }
    }

    /// List message IDs matching a Gmail search query, newest first.
    pub async fn list_messages(
        &self,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>, ApiError> {
        let resp = self
            .client
            .get(format!("{}/messages", GMAIL_BASE))
            .bearer_auth(&self.access_token)
            .query(&[("q", query), ("maxResults", &max_results.to_string())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        let list: MessageListResponse = resp.json().await?;
        Ok(list.messages.into_iter().map(|stub| stub.id).collect())
    }

    /// Fetch one message in full format (headers + MIME part tree).
    pub async fn get_message(&self, id: &str) -> Result<RawMessage, ApiError> {
        let resp = self
            .client
            .get(format!("{}/messages/{}", GMAIL_BASE, id))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        Ok(resp.json().await?)
    }

    /// Mark a message read by removing the UNREAD label.
    pub async fn mark_read(&self, id: &str) -> Result<(), ApiError> {
        let body = serde_json::json!({ "removeLabelIds": ["UNREAD"] });

        let resp = self
            .client
            .post(format!("{}/messages/{}/modify", GMAIL_BASE, id))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, body));
        }

        Ok(())
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn list(&self, query: &str, max_results: u32) -> Result<Vec<String>, ApiError> {
        self.list_messages(query, max_results).await
    }

    async fn fetch(&self, id: &str) -> Result<Option<RawMessage>, ApiError> {
        match self.get_message(id).await {
            Ok(msg) => Ok(Some(msg)),
            // A 404 means the message vanished between list and fetch
            Err(ApiError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn mark_done(&self, id: &str) -> Result<(), ApiError> {
        self.mark_read(id).await
    }
}

// ============================================================================
// Tests
// ============================================================================
