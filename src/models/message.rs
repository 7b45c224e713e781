use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyContentType {
    #[default]
    Text,
    Html,
}

impl BodyContentType {
    /// Anything other than `text` is treated as markup.
    pub fn from_wire(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("text") {
            BodyContentType::Text
        } else {
            BodyContentType::Html
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub content_type: BodyContentType,
    pub received_at: DateTime<Utc>,
    pub sender: String,
    pub is_read: bool,
}
