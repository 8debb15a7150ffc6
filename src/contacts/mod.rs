//! Contact records and the sources that list them.
//!
//! Contacts come from a spreadsheet: a 2-D array of strings whose first row
//! holds the column headers.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Importance values (case-insensitive) that mark a contact as VIP.
pub const VIP_INDICATORS: &[&str] = &["VIP", "HIGH", "IMPORTANT"];

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Errors raised while listing contacts.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The source could not be reached at all.
    #[error("contact source unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required column header is missing.
    #[error("missing required column '{0}'")]
    MissingHeader(String),
}

/// Result type for contact source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// How much a contact matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    #[default]
    Standard,
    Vip,
}

impl Importance {
    /// Parse a spreadsheet importance cell.
    pub fn from_cell(value: &str) -> Self {
        let value = value.trim();
        if VIP_INDICATORS
            .iter()
            .any(|indicator| value.eq_ignore_ascii_case(indicator))
        {
            Importance::Vip
        } else {
            Importance::Standard
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Importance::Standard => f.write_str("standard"),
            Importance::Vip => f.write_str("vip"),
        }
    }
}

/// One contact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub first_name: String,
    pub email: String,
    pub context: String,
    pub importance: Importance,
}

impl ContactRecord {
    pub fn new(
        first_name: impl Into<String>,
        email: impl Into<String>,
        context: impl Into<String>,
        importance: Importance,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            email: email.into(),
            context: context.into(),
            importance,
        }
    }

    pub fn is_vip(&self) -> bool {
        self.importance == Importance::Vip
    }
}

/// Spreadsheet header names for each contact field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub name: String,
    pub email: String,
    pub context: String,
    pub importance: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            name: "Name".to_string(),
            email: "Email".to_string(),
            context: "Context".to_string(),
            importance: "Importance".to_string(),
        }
    }
}

/// Convert sheet rows (header first) into contact records.
///
/// Short rows are padded with empty cells. Rows without an email or a name
/// are dropped.
pub fn parse_sheet_rows(
    rows: &[Vec<String>],
    columns: &ColumnMapping,
) -> SourceResult<Vec<ContactRecord>> {
    let Some((header, body)) = rows.split_first() else {
        return Ok(Vec::new());
    };

    let index: HashMap<&str, usize> = header
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim(), i))
        .collect();
    let required = |column: &str| {
        index
            .get(column)
            .copied()
            .ok_or_else(|| SourceError::MissingHeader(column.to_string()))
    };

    let name_idx = required(&columns.name)?;
    let email_idx = required(&columns.email)?;
    let context_idx = index.get(columns.context.as_str()).copied();
    let importance_idx = index.get(columns.importance.as_str()).copied();

    let cell = |row: &[String], idx: Option<usize>| -> String {
        idx.and_then(|i| row.get(i))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let mut contacts = Vec::with_capacity(body.len());
    for (row_number, row) in body.iter().enumerate() {
        let name = cell(row, Some(name_idx));
        let email = cell(row, Some(email_idx));
        if name.is_empty() || email.is_empty() {
            debug!(row = row_number + 2, "skipping row without name or email");
            continue;
        }

        let first_name = name.split_whitespace().next().unwrap_or_default().to_string();
        contacts.push(ContactRecord {
            first_name,
            email,
            context: cell(row, context_idx),
            importance: Importance::from_cell(&cell(row, importance_idx)),
        });
    }

    Ok(contacts)
}

/// Something that can list contacts in row order.
#[async_trait]
pub trait ContactSource: Send + Sync {
    async fn list_contacts(&self) -> SourceResult<Vec<ContactRecord>>;
}

/// Values payload as returned by the Sheets API.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RowsDocument {
    Bare(Vec<Vec<String>>),
    Values {
        #[serde(default)]
        values: Vec<Vec<String>>,
    },
}

impl RowsDocument {
    fn into_rows(self) -> Vec<Vec<String>> {
        match self {
            RowsDocument::Bare(rows) => rows,
            RowsDocument::Values { values } => values,
        }
    }
}

/// Local JSON export of a sheet, either `{"values": [[..]]}` or `[[..]]`.
#[derive(Debug, Clone)]
pub struct JsonRowsSource {
    path: PathBuf,
    columns: ColumnMapping,
}

impl JsonRowsSource {
    pub fn new(path: impl Into<PathBuf>, columns: ColumnMapping) -> Self {
        Self {
            path: path.into(),
            columns,
        }
    }
}

#[async_trait]
impl ContactSource for JsonRowsSource {
    async fn list_contacts(&self) -> SourceResult<Vec<ContactRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            SourceError::Unavailable(format!("{}: {}", self.path.display(), err))
        })?;
        let rows = serde_json::from_str::<RowsDocument>(&content)?.into_rows();
        let contacts = parse_sheet_rows(&rows, &self.columns)?;
        info!(
            path = %self.path.display(),
            rows = rows.len().saturating_sub(1),
            contacts = contacts.len(),
            "read contacts"
        );
        Ok(contacts)
    }
}

/// Credentials accepted by the Sheets API.
#[derive(Debug, Clone)]
pub enum SheetsAuth {
    /// API key, for sheets shared by link
    ApiKey(String),
    /// OAuth bearer token
    Bearer(String),
}

/// Google Sheets values API reader.
#[derive(Debug, Clone)]
pub struct SheetsContactSource {
    client: reqwest::Client,
    spreadsheet_id: String,
    range: String,
    auth: SheetsAuth,
    columns: ColumnMapping,
}

impl SheetsContactSource {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        range: impl Into<String>,
        auth: SheetsAuth,
        columns: ColumnMapping,
        timeout: Duration,
    ) -> SourceResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            spreadsheet_id: spreadsheet_id.into(),
            range: range.into(),
            auth,
            columns,
        })
    }

    fn values_url(&self) -> String {
        format!(
            "{}/{}/values/{}",
            SHEETS_API_BASE, self.spreadsheet_id, self.range
        )
    }
}

#[async_trait]
impl ContactSource for SheetsContactSource {
    async fn list_contacts(&self) -> SourceResult<Vec<ContactRecord>> {
        let request = self.client.get(self.values_url());
        let request = match &self.auth {
            SheetsAuth::ApiKey(key) => request.query(&[("key", key)]),
            SheetsAuth::Bearer(token) => request.bearer_auth(token),
        };

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!(
                "Sheets API returned {}: {}",
                status, body
            )));
        }

        let rows = response.json::<RowsDocument>().await?.into_rows();
        let contacts = parse_sheet_rows(&rows, &self.columns)?;
        info!(
            spreadsheet = %self.spreadsheet_id,
            contacts = contacts.len(),
            "read contacts from Google Sheets"
        );
        Ok(contacts)
    }
}
