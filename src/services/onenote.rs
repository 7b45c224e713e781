use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{graph_url, truncate_body};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notebook {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub id: String,
    pub display_name: String,
    pub notebook_id: String,
}

/// Where notes end up: notebooks containing sections containing pages.
#[async_trait]
pub trait NoteSink: Send + Sync {
    async fn list_notebooks(&self, token: &str) -> Result<Vec<Notebook>>;

    async fn create_notebook(&self, token: &str, name: &str) -> Result<String>;

    async fn list_sections(&self, token: &str, notebook_id: &str) -> Result<Vec<Section>>;

    async fn create_section(&self, token: &str, notebook_id: &str, name: &str) -> Result<String>;

    /// Returns the id of the new page.
    async fn create_page(
        &self,
        token: &str,
        section_id: &str,
        title: &str,
        html_content: &str,
    ) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    id: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedEntity {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateNamedRequest<'a> {
    #[serde(rename = "displayName")]
    display_name: &'a str,
}

/// The pages endpoint wants a full XHTML document, not a fragment.
fn page_document(title: &str, html_content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{}</title>
</head>
<body>
    {}
</body>
</html>"#,
        htmlescape::encode_minimal(title),
        html_content
    )
}

pub struct OneNoteClient {
    client: Client,
}

impl OneNoteClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::OneNoteApi(format!(
            "Failed to {} ({}): {}",
            action,
            status,
            truncate_body(&body)
        )))
    }
}

impl Default for OneNoteClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NoteSink for OneNoteClient {
    async fn list_notebooks(&self, token: &str) -> Result<Vec<Notebook>> {
        let response = self
            .client
            .get(graph_url(&["me", "onenote", "notebooks"])?)
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check(response, "list notebooks").await?;

        let list: ListResponse<NamedEntity> = response.json().await?;
        Ok(list
            .value
            .into_iter()
            .map(|nb| Notebook {
                id: nb.id,
                display_name: nb.display_name,
            })
            .collect())
    }

    async fn create_notebook(&self, token: &str, name: &str) -> Result<String> {
        let response = self
            .client
            .post(graph_url(&["me", "onenote", "notebooks"])?)
            .bearer_auth(token)
            .json(&CreateNamedRequest { display_name: name })
            .send()
            .await?;
        let response = Self::check(response, "create notebook").await?;

        let created: CreatedEntity = response.json().await?;
        tracing::info!("Created notebook '{}'", name);
        Ok(created.id)
    }

    async fn list_sections(&self, token: &str, notebook_id: &str) -> Result<Vec<Section>> {
        let response = self
            .client
            .get(graph_url(&["me", "onenote", "notebooks", notebook_id, "sections"])?)
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check(response, "list sections").await?;

        let list: ListResponse<NamedEntity> = response.json().await?;
        Ok(list
            .value
            .into_iter()
            .map(|s| Section {
                id: s.id,
                display_name: s.display_name,
                notebook_id: notebook_id.to_string(),
            })
            .collect())
    }

    async fn create_section(&self, token: &str, notebook_id: &str, name: &str) -> Result<String> {
        let response = self
            .client
            .post(graph_url(&["me", "onenote", "notebooks", notebook_id, "sections"])?)
            .bearer_auth(token)
            .json(&CreateNamedRequest { display_name: name })
            .send()
            .await?;
        let response = Self::check(response, "create section").await?;

        let created: CreatedEntity = response.json().await?;
        tracing::info!("Created section '{}'", name);
        Ok(created.id)
    }

    async fn create_page(
        &self,
        token: &str,
        section_id: &str,
        title: &str,
        html_content: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post(graph_url(&["me", "onenote", "sections", section_id, "pages"])?)
            .bearer_auth(token)
            .header(CONTENT_TYPE, "text/html")
            .body(page_document(title, html_content))
            .send()
            .await?;
        let response = Self::check(response, "create page").await?;

        let created: CreatedEntity = response.json().await?;
        Ok(created.id)
    }
}
