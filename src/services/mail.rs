use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{BodyContentType, RawMessage};

use super::{graph_url, truncate_body};

pub const FETCH_PAGE_SIZE: u32 = 50;
const MESSAGE_SELECT_FIELDS: &str = "id,subject,body,receivedDateTime,from,isRead";

/// Which messages a poll is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub subject_prefix: String,
    pub since: DateTime<Utc>,
    pub owner: String,
    pub limit: u32,
}

impl MessageQuery {
    /// OData filter for self-sent messages whose subject starts with the
    /// prefix. Graph compares `startsWith` case-insensitively.
    pub fn odata_filter(&self) -> String {
        format!(
            "receivedDateTime ge {} and startsWith(subject, '{}') and from/emailAddress/address eq '{}'",
            self.since.format("%Y-%m-%dT%H:%M:%SZ"),
            escape_odata_literal(&self.subject_prefix),
            escape_odata_literal(&self.owner),
        )
    }
}

fn escape_odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
pub trait MailSource: Send + Sync {
    /// Address of the signed-in account.
    async fn current_user_address(&self, token: &str) -> Result<String>;

    /// Newest first, at most `query.limit` messages.
    async fn fetch_matching(&self, token: &str, query: &MessageQuery) -> Result<Vec<RawMessage>>;

    async fn mark_read(&self, token: &str, message_id: &str) -> Result<bool>;
}

#[derive(Debug, Deserialize)]
struct GraphUser {
    mail: Option<String>,
    #[serde(rename = "userPrincipalName")]
    user_principal_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessagesPage {
    #[serde(default)]
    value: Vec<GraphMessage>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    subject: Option<String>,
    body: Option<GraphBody>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: DateTime<Utc>,
    from: Option<GraphRecipient>,
    #[serde(rename = "isRead")]
    is_read: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Debug, Serialize)]
struct MarkReadRequest {
    #[serde(rename = "isRead")]
    is_read: bool,
}

impl From<GraphMessage> for RawMessage {
    fn from(message: GraphMessage) -> Self {
        let (body, content_type) = match message.body {
            Some(body) => (
                body.content.unwrap_or_default(),
                body.content_type
                    .as_deref()
                    .map(BodyContentType::from_wire)
                    .unwrap_or_default(),
            ),
            None => (String::new(), BodyContentType::Text),
        };

        RawMessage {
            id: message.id,
            subject: message.subject.unwrap_or_default(),
            body,
            content_type,
            received_at: message.received_date_time,
            sender: message
                .from
                .and_then(|f| f.email_address)
                .and_then(|e| e.address)
                .unwrap_or_default(),
            is_read: message.is_read.unwrap_or(false),
        }
    }
}

/// Outlook mailbox access through Microsoft Graph.
pub struct GraphMailClient {
    client: Client,
    user_address: Mutex<Option<String>>,
}

impl GraphMailClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            user_address: Mutex::new(None),
        }
    }
}

impl Default for GraphMailClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailSource for GraphMailClient {
    async fn current_user_address(&self, token: &str) -> Result<String> {
        let mut cached = self.user_address.lock().await;
        if let Some(address) = cached.as_ref() {
            return Ok(address.clone());
        }

        let response = self
            .client
            .get(graph_url(&["me"])?)
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GraphApi(format!(
                "Failed to get user info ({}): {}",
                status,
                truncate_body(&body)
            )));
        }

        let user: GraphUser = response.json().await?;
        let address = user
            .mail
            .filter(|m| !m.is_empty())
            .or(user.user_principal_name)
            .unwrap_or_default();

        tracing::debug!("Signed in as {}", address);
        *cached = Some(address.clone());
        Ok(address)
    }

    async fn fetch_matching(&self, token: &str, query: &MessageQuery) -> Result<Vec<RawMessage>> {
        let filter = query.odata_filter();
        let top = query.limit.to_string();

        let response = self
            .client
            .get(graph_url(&["me", "messages"])?)
            .bearer_auth(token)
            .query(&[
                ("$filter", filter.as_str()),
                ("$select", MESSAGE_SELECT_FIELDS),
                ("$orderby", "receivedDateTime desc"),
                ("$top", top.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GraphApi(format!(
                "Failed to fetch emails ({}): {}",
                status,
                truncate_body(&body)
            )));
        }

        let page: GraphMessagesPage = response.json().await?;
        Ok(page.value.into_iter().map(RawMessage::from).collect())
    }

    async fn mark_read(&self, token: &str, message_id: &str) -> Result<bool> {
        let response = self
            .client
            .patch(graph_url(&["me", "messages", message_id])?)
            .bearer_auth(token)
            .json(&MarkReadRequest { is_read: true })
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}
