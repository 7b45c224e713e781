use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::ProcessedRecord;

use super::schema::SCHEMA;

/// Persistent record of which messages were already turned into pages.
///
/// Every operation opens its own connection and closes it before returning,
/// so nothing is held open between polls.
pub struct Ledger {
    db_path: PathBuf,
}

impl Ledger {
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::StorageUnavailable(format!(
                    "cannot create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let ledger = Self { db_path };
        ledger
            .with_connection(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        tracing::debug!("Ledger ready at {}", ledger.db_path.display());
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<F, R>(&self, function: F) -> Result<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Connection::open(&self.db_path).await?;
        let result = conn.call(function).await;

        if let Err(e) = conn.close().await {
            tracing::warn!("Failed to close ledger connection: {}", e);
        }

        Ok(result?)
    }

    pub async fn is_processed(&self, message_id: &str) -> Result<bool> {
        let message_id = message_id.to_string();
        self.with_connection(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM processed_emails WHERE email_id = ?1",
                params![message_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// Insert or refresh the record for `message_id`. `processed_at` is
    /// always the time of this call.
    pub async fn mark_processed(
        &self,
        message_id: &str,
        subject: &str,
        received_at: DateTime<Utc>,
        page_id: Option<&str>,
    ) -> Result<()> {
        let message_id = message_id.to_string();
        let subject = subject.to_string();
        let page_id = page_id.map(str::to_string);
        let processed_at = format_timestamp(Utc::now());
        let received_at = format_timestamp(received_at);

        self.with_connection(move |conn| {
            conn.execute(
                r#"INSERT INTO processed_emails (email_id, subject, onenote_page_id, processed_at, received_at)
                   VALUES (?1, ?2, ?3, ?4, ?5)
                   ON CONFLICT(email_id) DO UPDATE SET
                       subject = excluded.subject,
                       onenote_page_id = excluded.onenote_page_id,
                       processed_at = excluded.processed_at,
                       received_at = excluded.received_at"#,
                params![message_id, subject, page_id, processed_at, received_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn count(&self) -> Result<u64> {
        self.with_connection(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM processed_emails", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    /// Newest first. Records sharing a `processed_at` value come back in
    /// rowid order, which callers should not rely on.
    pub async fn recent(&self, limit: usize) -> Result<Vec<ProcessedRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                r#"SELECT email_id, subject, onenote_page_id, processed_at, received_at
                   FROM processed_emails
                   ORDER BY processed_at DESC, rowid DESC
                   LIMIT ?1"#,
            )?;
            let records = stmt
                .query_map(params![limit], record_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    /// Forget every processed message. Returns the number of records removed.
    pub async fn clear(&self) -> Result<u64> {
        self.with_connection(|conn| {
            let deleted = conn.execute("DELETE FROM processed_emails", [])?;
            Ok(deleted as u64)
        })
        .await
    }
}

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Rows written by older builds used naive ISO timestamps
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    None
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

fn record_from_row(row: &Row) -> rusqlite::Result<ProcessedRecord> {
    Ok(ProcessedRecord {
        message_id: row.get(0)?,
        subject: row.get(1)?,
        page_id: row.get(2)?,
        processed_at: timestamp_column(row, 3)?,
        received_at: timestamp_column(row, 4)?,
    })
}
