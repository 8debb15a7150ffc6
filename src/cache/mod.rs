//! Generated content cache keyed by a contact fingerprint.
//!
//! A fingerprint covers the recipient email and the context text, so any
//! change to the context produces a miss and a fresh generation. Entries have
//! no expiry.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::budget::TierKind;
use crate::contacts::ContactRecord;
use crate::storage;

/// Current cache file schema version.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Errors that can occur while persisting the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Stable digest of the identity-relevant fields of a contact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an (email, context) pair.
    ///
    /// The email is trimmed and lowercased; the context is trimmed with
    /// whitespace runs collapsed. The email is length-prefixed so no two
    /// distinct pairs share a preimage.
    pub fn compute(email: &str, context: &str) -> Self {
        let email = email.trim().to_lowercase();
        let context = context.split_whitespace().collect::<Vec<_>>().join(" ");

        let mut hasher = Sha256::new();
        hasher.update(email.len().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(email.as_bytes());
        hasher.update(b"\n");
        hasher.update(context.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn for_contact(contact: &ContactRecord) -> Self {
        Self::compute(&contact.email, &contact.context)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Email content produced by one successful backend call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    pub body: String,
    /// Backend model identifier
    pub model_used: String,
    pub tier: TierKind,
    pub token_count: u64,
    /// Cost charged for the call in USD
    pub cost: f64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheFile {
    schema_version: u32,
    entries: HashMap<Fingerprint, GeneratedContent>,
}

/// Fingerprint to content map with optional JSON persistence.
#[derive(Debug)]
pub struct ContentCache {
    path: Option<PathBuf>,
    entries: HashMap<Fingerprint, GeneratedContent>,
}

impl ContentCache {
    /// Load the cache at `path`, starting empty if it does not exist.
    ///
    /// An unreadable cache file is discarded with a warning: losing cached
    /// content costs regeneration but never affects spend accounting.
    pub fn open(path: impl Into<PathBuf>) -> CacheResult<Self> {
        let path = path.into();
        storage::ensure_parent_dir(&path)?;

        let entries = match storage::read_json::<CacheFile>(&path) {
            Ok(Some(file)) => file.entries,
            Ok(None) => HashMap::new(),
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                warn!(path = %path.display(), error = %err, "discarding unreadable content cache");
                HashMap::new()
            }
            Err(err) => return Err(CacheError::Io(err)),
        };
        debug!(path = %path.display(), entries = entries.len(), "opened content cache");

        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// A cache that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: HashMap::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<&GeneratedContent> {
        self.entries.get(fingerprint)
    }

    /// Insert or replace an entry, then flush.
    ///
    /// The entry stays in memory even when the flush fails.
    pub fn store(&mut self, fingerprint: Fingerprint, content: GeneratedContent) -> CacheResult<()> {
        debug!(fingerprint = fingerprint.short(), model = %content.model_used, "caching content");
        self.entries.insert(fingerprint, content);
        self.flush()
    }

    /// Write all entries to the cache file, if any.
    pub fn flush(&self) -> CacheResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = CacheFile {
            schema_version: CACHE_SCHEMA_VERSION,
            entries: self.entries.clone(),
        };
        storage::write_json_atomic(path, &file)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry and flush.
    pub fn clear(&mut self) -> CacheResult<()> {
        self.entries.clear();
        self.flush()
    }
}
