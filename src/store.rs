//! Credential Store
//!
//! Mechanisms verify against the plaintext password a directory record
//! carries, so the store surface is a single lookup. The daemon ships a
//! flat-file store; tests use the in-memory one. Anything heavier (the
//! replicated directory database) lives behind the same trait.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Directory tools write this sentinel instead of a real password when an
/// account's cleartext has been withheld. It must never authenticate.
pub const BLACKLISTED_PASSWORD: &str = "********";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read credential database: {0}")]
    Io(#[from] std::io::Error),
}

/// Plaintext password lookup by username.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored plaintext for `username`, or `None` when the
    /// user has no record. Blacklist filtering is the caller's job.
    fn lookup_password(&self, username: &str) -> Option<String>;
}

// ─── Flat-file store ────────────────────────────────────────────────────────

/// Line-oriented credential file: one `username:password` per line, `#`
/// comments and blank lines ignored. The password runs to end of line, so
/// it may itself contain colons.
pub struct FileStore {
    records: HashMap<String, String>,
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path)?;
        Ok(Self::from_content(&content))
    }

    fn from_content(content: &str) -> Self {
        let mut records = HashMap::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if let Some((user, password)) = trimmed.split_once(':') {
                records.insert(user.to_string(), password.to_string());
            }
        }
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CredentialStore for FileStore {
    fn lookup_password(&self, username: &str) -> Option<String> {
        self.records.get(username).cloned()
    }
}

// ─── In-memory store ────────────────────────────────────────────────────────

/// Map-backed store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    records: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.records.insert(username.to_string(), password.to_string());
        self
    }
}

impl CredentialStore for MemoryStore {
    fn lookup_password(&self, username: &str) -> Option<String> {
        self.records.get(username).cloned()
    }
}
