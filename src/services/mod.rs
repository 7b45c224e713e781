mod mail;
mod onenote;

pub use mail::{GraphMailClient, MailSource, MessageQuery, FETCH_PAGE_SIZE};
pub use onenote::{Notebook, NoteSink, OneNoteClient, Section};

use url::Url;

use crate::error::{AppError, Result};

pub(crate) const GRAPH_API_URL: &str = "https://graph.microsoft.com/v1.0";

/// Keeps API error bodies from flooding the log.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Build a Graph endpoint URL, percent-encoding each path segment.
pub(crate) fn graph_url(segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(GRAPH_API_URL).map_err(|e| anyhow::anyhow!("bad base URL: {}", e))?;
    url.path_segments_mut()
        .map_err(|_| AppError::Config("Graph base URL cannot have a path".to_string()))?
        .extend(segments);
    Ok(url)
}

pub(crate) fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", cut)
    } else {
        body.to_string()
    }
}
