use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use crate::auth::{CredentialProvider, DeviceCodeAuth, TokenCache};
use crate::config::{Config, EmailConfig, OneNoteConfig};
use crate::db::Ledger;
use crate::error::{AppError, Result};
use crate::models::{ProcessedRecord, RawMessage};
use crate::processor::NoteTransformer;
use crate::services::{
    GraphMailClient, MailSource, MessageQuery, Notebook, NoteSink, OneNoteClient, Section,
    FETCH_PAGE_SIZE,
};

/// Outcome of a single pass over the inbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Titles a dry run would have published.
    pub would_create: Vec<String>,
}

#[derive(Debug)]
pub struct LedgerStatus {
    pub total: u64,
    pub recent: Vec<ProcessedRecord>,
}

/// Notebook and section names match regardless of case, Unicode included.
fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

enum MessageOutcome {
    Published,
    Planned(String),
}

pub struct App {
    email: EmailConfig,
    onenote: OneNoteConfig,
    transformer: NoteTransformer,
    ledger: Ledger,
    auth: Box<dyn CredentialProvider>,
    mail: Box<dyn MailSource>,
    notes: Box<dyn NoteSink>,
}

impl App {
    pub fn new(
        config: &Config,
        ledger: Ledger,
        auth: Box<dyn CredentialProvider>,
        mail: Box<dyn MailSource>,
        notes: Box<dyn NoteSink>,
    ) -> Self {
        Self {
            email: config.email.clone(),
            onenote: config.onenote.clone(),
            transformer: NoteTransformer::new(config.email.subject_pattern.clone()),
            ledger,
            auth,
            mail,
            notes,
        }
    }

    /// Wire up the Graph-backed collaborators described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let ledger = Ledger::open(config.storage.db_path()).await?;
        let auth = DeviceCodeAuth::new(
            config.azure.client_id.clone(),
            config.azure.tenant_id.clone(),
            TokenCache::load(config.storage.token_cache_path()),
        );

        Ok(Self::new(
            config,
            ledger,
            Box::new(auth),
            Box::new(GraphMailClient::new()),
            Box::new(OneNoteClient::new()),
        ))
    }

    pub async fn authenticate(&self, interactive: bool) -> Result<Option<String>> {
        self.auth.get_token(interactive).await
    }

    pub async fn has_cached_credential(&self) -> bool {
        self.auth.has_cached_credential().await
    }

    pub async fn logout(&self) -> Result<()> {
        self.auth.clear_cached_credential().await
    }

    /// One pass: fetch candidates, publish the ones not seen before.
    pub async fn run_once(&self, dry_run: bool) -> Result<RunReport> {
        let token = self
            .auth
            .get_token(false)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        self.process_messages(&token, dry_run).await
    }

    /// Poll every `interval` until `shutdown` resolves or the credential can
    /// no longer be renewed silently. A pass in progress always finishes.
    pub async fn run_loop<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            "Starting daemon mode. Checking every {} seconds.",
            interval.as_secs()
        );
        tokio::pin!(shutdown);

        loop {
            match self.auth.get_token(false).await {
                Ok(Some(token)) => {
                    if let Err(e) = self.process_messages(&token, false).await {
                        tracing::error!("Error during processing: {}", e);
                    }
                }
                Ok(None) => {
                    tracing::warn!("Token expired. Please re-authenticate.");
                    break;
                }
                Err(e) => tracing::error!("Error during processing: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = &mut shutdown => {
                    tracing::info!("Shutting down...");
                    break;
                }
            }
        }
    }

    async fn fetch_candidates(&self, token: &str) -> Result<Vec<RawMessage>> {
        let owner = self.mail.current_user_address(token).await?;
        let query = MessageQuery {
            subject_prefix: self.email.subject_pattern.clone(),
            since: Utc::now() - chrono::Duration::hours(i64::from(self.email.lookback_hours)),
            owner,
            limit: FETCH_PAGE_SIZE,
        };
        self.mail.fetch_matching(token, &query).await
    }

    async fn process_messages(&self, token: &str, dry_run: bool) -> Result<RunReport> {
        let mut report = RunReport::default();

        tracing::info!(
            "Fetching emails with subject pattern: {}",
            self.email.subject_pattern
        );
        tracing::info!("Looking back {} hours", self.email.lookback_hours);

        let messages = match self.fetch_candidates(token).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::error!("Failed to fetch emails: {}", e);
                return Ok(report);
            }
        };

        if messages.is_empty() {
            tracing::info!("No matching emails found.");
            return Ok(report);
        }
        tracing::info!("Found {} matching email(s)", messages.len());

        // Resolved on first publish, reused for the rest of the pass
        let mut section_id: Option<String> = None;

        for message in &messages {
            if self.ledger.is_processed(&message.id).await? {
                tracing::debug!("Skipping already processed: {}", message.subject);
                report.skipped += 1;
                continue;
            }

            tracing::info!("Processing: {}", message.subject);
            tracing::debug!("  from {} received {}", message.sender, message.received_at);

            match self
                .handle_message(token, message, dry_run, &mut section_id)
                .await
            {
                Ok(MessageOutcome::Published) => report.processed += 1,
                Ok(MessageOutcome::Planned(title)) => report.would_create.push(title),
                Err(e) => {
                    tracing::error!("  Failed to process email: {}", e);
                    report.failed += 1;
                }
            }
        }

        if dry_run {
            tracing::info!("Dry run complete. No changes made.");
        } else {
            tracing::info!("Processed {} new email(s)", report.processed);
        }
        Ok(report)
    }

    async fn handle_message(
        &self,
        token: &str,
        message: &RawMessage,
        dry_run: bool,
        section_id: &mut Option<String>,
    ) -> Result<MessageOutcome> {
        let note = self.transformer.process(message);

        if dry_run {
            tracing::info!("  [DRY RUN] Would create note: {}", note.title);
            return Ok(MessageOutcome::Planned(note.title));
        }

        let section = match section_id.clone() {
            Some(id) => id,
            None => {
                let id = self.resolve_section(token).await?;
                *section_id = Some(id.clone());
                id
            }
        };

        let page_id = self
            .notes
            .create_page(token, &section, &note.title, &note.html_content)
            .await?;
        tracing::info!("  Created OneNote page: {}", note.title);

        self.ledger
            .mark_processed(&note.message_id, &message.subject, note.received_at, Some(&page_id))
            .await?;

        if self.email.mark_as_read && !message.is_read {
            match self.mail.mark_read(token, &message.id).await {
                Ok(true) => tracing::debug!("  Marked email as read"),
                Ok(false) => tracing::warn!("  Could not mark email as read"),
                Err(e) => tracing::warn!("  Could not mark email as read: {}", e),
            }
        }

        Ok(MessageOutcome::Published)
    }

    /// Find the configured notebook and section by name (ignoring case),
    /// creating whichever is missing.
    async fn resolve_section(&self, token: &str) -> Result<String> {
        let notebooks = self.notes.list_notebooks(token).await?;
        let notebook_id = match notebooks
            .into_iter()
            .find(|nb| same_name(&nb.display_name, &self.onenote.notebook_name))
        {
            Some(nb) => nb.id,
            None => {
                self.notes
                    .create_notebook(token, &self.onenote.notebook_name)
                    .await?
            }
        };

        let sections = self.notes.list_sections(token, &notebook_id).await?;
        match sections
            .into_iter()
            .find(|s| same_name(&s.display_name, &self.onenote.section_name))
        {
            Some(section) => Ok(section.id),
            None => {
                self.notes
                    .create_section(token, &notebook_id, &self.onenote.section_name)
                    .await
            }
        }
    }

    pub async fn list_notebooks(&self) -> Result<Vec<(Notebook, Vec<Section>)>> {
        let token = self
            .auth
            .get_token(false)
            .await?
            .ok_or(AppError::Unauthenticated)?;

        let mut listing = Vec::new();
        for notebook in self.notes.list_notebooks(&token).await? {
            let sections = self.notes.list_sections(&token, &notebook.id).await?;
            listing.push((notebook, sections));
        }
        Ok(listing)
    }

    pub async fn status(&self, limit: usize) -> Result<LedgerStatus> {
        Ok(LedgerStatus {
            total: self.ledger.count().await?,
            recent: self.ledger.recent(limit).await?,
        })
    }

    pub async fn reset_ledger(&self) -> Result<u64> {
        let removed = self.ledger.clear().await?;
        tracing::info!(
            "Cleared {} record(s) from {}",
            removed,
            self.ledger.path().display()
        );
        Ok(removed)
    }
}
