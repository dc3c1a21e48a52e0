//! VersionedStore: the compare-and-swap blob store contract.
//!
//! The real backing store is an external version-controlled file host; this
//! crate only consumes the contract. All concurrency safety comes from the
//! store's per-path version token: a put is accepted only when the caller's
//! expected token matches the current remote one. `InMemoryStore` implements
//! the same semantics for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("version conflict: remote changed since the last known revision")]
    Conflict,

    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Opaque token identifying one revision of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A path's current content and revision token.
#[derive(Debug, Clone)]
pub struct Revision {
    pub content: Vec<u8>,
    pub version: Version,
}

/// Compare-and-swap blob store keyed by path.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    /// Fetch a path's current revision. `Ok(None)` when the path is absent.
    async fn get(&self, path: &str) -> Result<Option<Revision>>;

    /// Compare-and-swap write. `expected = None` means "create new": the
    /// write fails with `Conflict` when the current remote version differs
    /// from `expected`, or when the path already exists for a create.
    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        expected: Option<&Version>,
    ) -> Result<Version>;

    /// List file paths under a directory (recursively), filtered by suffix.
    async fn list_files(&self, dir: &str, suffix: &str) -> Result<Vec<String>>;
}

// Allows sharing one store between a session and a simulated remote actor
// in tests.
#[async_trait]
impl<T: VersionedStore> VersionedStore for std::sync::Arc<T> {
    async fn get(&self, path: &str) -> Result<Option<Revision>> {
        (**self).get(path).await
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        expected: Option<&Version>,
    ) -> Result<Version> {
        (**self).put(path, content, message, expected).await
    }

    async fn list_files(&self, dir: &str, suffix: &str) -> Result<Vec<String>> {
        (**self).list_files(dir, suffix).await
    }
}

struct Entry {
    content: Vec<u8>,
    version: Version,
    message: String,
}

/// In-memory store for testing.
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    next_revision: AtomicU64,
    puts: AtomicU64,
    fail_put_matching: RwLock<Option<String>>,
    fail_get_matching: RwLock<Option<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_revision: AtomicU64::new(1),
            puts: AtomicU64::new(0),
            fail_put_matching: RwLock::new(None),
            fail_get_matching: RwLock::new(None),
        }
    }

    /// Fail the next put whose path contains `fragment` with a transport
    /// error. One-shot, for partial-failure scenarios.
    pub fn fail_next_put_matching(&self, fragment: &str) {
        *self.fail_put_matching.write().unwrap() = Some(fragment.to_string());
    }

    /// Fail the next get whose path contains `fragment` with a transport
    /// error. One-shot.
    pub fn fail_next_get_matching(&self, fragment: &str) {
        *self.fail_get_matching.write().unwrap() = Some(fragment.to_string());
    }

    /// Number of accepted puts so far.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Commit message recorded for a path's current revision.
    pub fn last_message(&self, path: &str) -> Option<String> {
        let entries = self.entries.read().unwrap();
        entries.get(path).map(|e| e.message.clone())
    }

    fn mint_version(&self) -> Version {
        let n = self.next_revision.fetch_add(1, Ordering::Relaxed);
        Version::new(format!("r{n}"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionedStore for InMemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Revision>> {
        {
            let mut fail = self.fail_get_matching.write().unwrap();
            if fail.as_deref().is_some_and(|fragment| path.contains(fragment)) {
                fail.take();
                return Err(StoreError::Transport(format!(
                    "injected get failure for {path}"
                )));
            }
        }

        let entries = self.entries.read().unwrap();
        Ok(entries.get(path).map(|entry| Revision {
            content: entry.content.clone(),
            version: entry.version.clone(),
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        message: &str,
        expected: Option<&Version>,
    ) -> Result<Version> {
        {
            let mut fail = self.fail_put_matching.write().unwrap();
            if fail.as_deref().is_some_and(|fragment| path.contains(fragment)) {
                fail.take();
                return Err(StoreError::Transport(format!(
                    "injected put failure for {path}"
                )));
            }
        }

        let mut entries = self.entries.write().unwrap();
        match (entries.get(path), expected) {
            (Some(entry), Some(version)) if entry.version == *version => {}
            (None, None) => {}
            _ => return Err(StoreError::Conflict),
        }

        let version = self.mint_version();
        entries.insert(
            path.to_string(),
            Entry {
                content: content.to_vec(),
                version: version.clone(),
                message: message.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(version)
    }

    async fn list_files(&self, dir: &str, suffix: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let entries = self.entries.read().unwrap();
        let mut paths: Vec<String> = entries
            .keys()
            .filter(|path| path.starts_with(&prefix) && path.ends_with(suffix))
            .cloned()
            .collect();
        paths.sort();
        Ok(paths)
    }
}
