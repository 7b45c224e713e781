use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub message_id: String,
    pub subject: String,
    pub page_id: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}
