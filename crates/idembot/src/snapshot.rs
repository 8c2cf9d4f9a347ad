//! Local snapshot store.
//!
//! Every raw payload the bot fetches is written to disk together with the
//! moment it was fetched:
//!
//! ```text
//! {root}/{owner}/{name}/{kind}/{bucket}/{id}.json
//! {"timestamp": "2024-05-01T12:00:00Z", "content": { ... }}
//! ```
//!
//! `bucket` is the id rounded down to the nearest thousand, so no directory
//! grows past a thousand files. Entries never expire and are overwritten in
//! place; freshness is decided by the synchronizer comparing `timestamp`
//! against the remote `updated_at`.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::RepoRef;

/// Ids per bucket directory.
pub const BUCKET_SIZE: u64 = 1000;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot at {path} is not valid: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Issue,
    PullRequest,
}

impl EntityKind {
    #[must_use]
    pub fn dir_name(self) -> &'static str {
        match self {
            EntityKind::Issue => "issues",
            EntityKind::PullRequest => "pulls",
        }
    }
}

/// Location of one cached payload, deterministic in `(repo, kind, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repo: RepoRef,
    pub kind: EntityKind,
    pub id: u64,
}

impl CacheKey {
    pub fn new(repo: &RepoRef, kind: EntityKind, id: u64) -> Self {
        Self {
            repo: repo.clone(),
            kind,
            id,
        }
    }

    pub fn issue(repo: &RepoRef, number: u64, is_pull_request: bool) -> Self {
        let kind = if is_pull_request {
            EntityKind::PullRequest
        } else {
            EntityKind::Issue
        };
        Self::new(repo, kind, number)
    }

    #[must_use]
    pub fn bucket(&self) -> u64 {
        (self.id / BUCKET_SIZE) * BUCKET_SIZE
    }

    /// Path relative to the store root.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.repo.owner);
        path.push(&self.repo.name);
        path.push(self.kind.dir_name());
        path.push(self.bucket().to_string());
        path.push(format!("{}.json", self.id));
        path
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.repo.owner,
            self.repo.name,
            self.kind.dir_name(),
            self.bucket(),
            self.id
        )
    }
}

/// A payload plus the time it was fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub timestamp: DateTime<Utc>,
    pub content: T,
}

#[derive(Serialize)]
struct SnapshotRef<'a, T: Serialize> {
    timestamp: DateTime<Utc>,
    content: &'a T,
}

/// Directory-backed store of [`Snapshot`]s.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Write `content` under `key`, replacing any previous entry.
    pub async fn save<T: Serialize>(
        &self,
        key: &CacheKey,
        content: &T,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SnapshotError> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(&SnapshotRef { timestamp, content }).map_err(|source| {
            SnapshotError::Decode {
                path: path.clone(),
                source,
            }
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SnapshotError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| SnapshotError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::trace!(key = %key, "Saved snapshot");
        Ok(())
    }

    /// Read the entry under `key`, or `None` if nothing was ever saved.
    pub async fn load<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<Snapshot<T>>, SnapshotError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| SnapshotError::Decode { path, source })
    }

    /// Timestamp of the entry under `key` without decoding its content.
    pub async fn timestamp(&self, key: &CacheKey) -> Result<Option<DateTime<Utc>>, SnapshotError> {
        Ok(self
            .load::<serde::de::IgnoredAny>(key)
            .await?
            .map(|snapshot| snapshot.timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn repo() -> RepoRef {
        RepoRef::new("octo", "bot")
    }

    #[test]
    fn keys_bucket_by_thousands() {
        let key = CacheKey::new(&repo(), EntityKind::Issue, 1234);
        assert_eq!(key.bucket(), 1000);
        assert_eq!(key.to_string(), "octo/bot/issues/1000/1234");
        assert_eq!(
            key.relative_path(),
            PathBuf::from("octo/bot/issues/1000/1234.json")
        );

        assert_eq!(CacheKey::new(&repo(), EntityKind::PullRequest, 999).bucket(), 0);
        assert_eq!(CacheKey::issue(&repo(), 1000, true).to_string(), "octo/bot/pulls/1000/1000");
    }

    #[tokio::test]
    async fn missing_entry_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let key = CacheKey::new(&repo(), EntityKind::Issue, 1);

        let loaded: Option<Snapshot<serde_json::Value>> = store.load(&key).await.expect("load");
        assert!(loaded.is_none());
        assert!(store.timestamp(&key).await.expect("timestamp").is_none());
    }

    #[tokio::test]
    async fn save_then_load_overwrites_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let key = CacheKey::new(&repo(), EntityKind::Issue, 42);
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        store
            .save(&key, &serde_json::json!({"title": "old"}), first)
            .await
            .expect("save");
        store
            .save(&key, &serde_json::json!({"title": "new"}), second)
            .await
            .expect("save again");

        let loaded: Snapshot<serde_json::Value> =
            store.load(&key).await.expect("load").expect("present");
        assert_eq!(loaded.timestamp, second);
        assert_eq!(loaded.content["title"], "new");
        assert!(dir.path().join("octo/bot/issues/0/42.json").is_file());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_decode_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::new(dir.path());
        let key = CacheKey::new(&repo(), EntityKind::PullRequest, 7);
        let path = store.path_for(&key);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, b"{not json").expect("write");

        let err = store
            .load::<serde_json::Value>(&key)
            .await
            .expect_err("corrupt");
        assert!(matches!(err, SnapshotError::Decode { .. }));
    }
}
