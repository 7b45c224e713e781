use chrono::{DateTime, Utc};

/// A message rendered into a page ready for the notebook store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub message_id: String,
    pub title: String,
    pub html_content: String,
    pub received_at: DateTime<Utc>,
}
