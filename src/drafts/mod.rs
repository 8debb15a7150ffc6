//! Draft requests and the sinks that save them.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::contacts::ContactRecord;
use crate::storage;

const GMAIL_DRAFTS_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/drafts";

/// Errors that can occur while saving a draft.
#[derive(Error, Debug)]
pub enum DraftError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The mailbox API rejected the draft.
    #[error("mailbox API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for draft sink operations.
pub type DraftResult<T> = Result<T, DraftError>;

/// An unsent email awaiting human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl DraftRequest {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    /// Build the draft for `contact` with subject `"<prefix> for <name> - <date>"`.
    pub fn for_contact(
        contact: &ContactRecord,
        body: impl Into<String>,
        subject_prefix: &str,
        date: NaiveDate,
    ) -> Self {
        let subject = format!(
            "{} for {} - {}",
            subject_prefix,
            contact.first_name,
            date.format("%Y-%m-%d")
        );
        Self::new(contact.email.clone(), subject, body)
    }

    /// Render as an RFC 822 plain-text message.
    pub fn to_rfc822(&self) -> String {
        format!(
            "To: {}\r\nSubject: {}\r\nMIME-Version: 1.0\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
            sanitize_header(&self.to),
            sanitize_header(&self.subject),
            self.body
        )
    }

    /// RFC 822 message, base64url encoded as the Gmail API expects.
    pub fn raw(&self) -> String {
        URL_SAFE.encode(self.to_rfc822().as_bytes())
    }
}

/// Header values must not carry line breaks.
fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Somewhere a draft can be saved.
#[async_trait]
pub trait DraftSink: Send + Sync {
    /// Save the draft, returning an identifier for it.
    async fn create_draft(&self, draft: &DraftRequest) -> DraftResult<String>;
}

/// Saves drafts to a Gmail mailbox.
#[derive(Debug, Clone)]
pub struct GmailDraftSink {
    client: reqwest::Client,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DraftResponse {
    id: String,
}

impl GmailDraftSink {
    pub fn new(access_token: impl Into<String>, timeout: Duration) -> DraftResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            access_token: access_token.into(),
        })
    }
}

#[async_trait]
impl DraftSink for GmailDraftSink {
    async fn create_draft(&self, draft: &DraftRequest) -> DraftResult<String> {
        let payload = json!({ "message": { "raw": draft.raw() } });
        let response = self
            .client
            .post(GMAIL_DRAFTS_URL)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DraftError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let created: DraftResponse = response.json().await?;
        info!(to = %draft.to, draft_id = %created.id, "created Gmail draft");
        Ok(created.id)
    }
}

/// Appends drafts as JSON lines to a local outbox file.
#[derive(Debug, Clone)]
pub struct OutboxDraftSink {
    path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    pub draft: DraftRequest,
}

impl OutboxDraftSink {
    pub fn new(path: impl Into<PathBuf>) -> DraftResult<Self> {
        let path = path.into();
        storage::ensure_parent_dir(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, entry: &OutboxEntry) -> DraftResult<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(entry)?;
        writeln!(file, "{}", json)?;
        file.sync_all()?;
        Ok(())
    }

    /// Read every entry back, in append order.
    pub fn read_all(&self) -> DraftResult<Vec<OutboxEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(DraftError::from))
            .collect()
    }
}

#[async_trait]
impl DraftSink for OutboxDraftSink {
    async fn create_draft(&self, draft: &DraftRequest) -> DraftResult<String> {
        let created_at = chrono::Utc::now();
        let id = format!(
            "outbox-{}-{}",
            created_at.timestamp_millis(),
            &crate::cache::Fingerprint::compute(&draft.to, &draft.body).short()[..8]
        );
        let entry = OutboxEntry {
            id: id.clone(),
            created_at,
            draft: draft.clone(),
        };
        self.append(&entry)?;
        info!(to = %draft.to, path = %self.path.display(), "wrote draft to outbox");
        Ok(id)
    }
}

/// Logs drafts without saving them anywhere (dry run).
#[derive(Debug, Clone, Default)]
pub struct LogDraftSink;

#[async_trait]
impl DraftSink for LogDraftSink {
    async fn create_draft(&self, draft: &DraftRequest) -> DraftResult<String> {
        info!(
            to = %draft.to,
            subject = %draft.subject,
            body_chars = draft.body.chars().count(),
            "dry run: draft not saved"
        );
        Ok("dry-run".to_string())
    }
}
