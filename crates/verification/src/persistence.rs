//! Key-value persistence for token records
//!
//! Keys are token digests (see `token::token_key`), values are
//! `StoredToken` records. Backends make no atomicity promise across calls;
//! `TokenStore` serializes check-and-consume itself.
//!
//! `FilePersistence` keeps the whole map in memory and rewrites the JSON
//! file on every change, using temp-file + rename so a crash mid-write never
//! leaves a truncated file.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{PersistenceError, Result};
use crate::token::StoredToken;

/// Storage backend for token records.
///
/// Uses `Pin<Box<dyn Future>>` return types so backends can be held as
/// `Arc<dyn TokenPersistence>`.
pub trait TokenPersistence: Send + Sync {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredToken>>> + Send + 'a>>;

    fn set<'a>(
        &'a self,
        key: &'a str,
        record: &'a StoredToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Removing a missing key is not an error.
    fn delete<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn keys<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;
}

/// Process-local records; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: Mutex<HashMap<String, StoredToken>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl TokenPersistence for MemoryPersistence {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredToken>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.records.lock().await.get(key).cloned()) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        record: &'a StoredToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.records
                .lock()
                .await
                .insert(key.to_string(), record.clone());
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.records.lock().await.remove(key);
            Ok(())
        })
    }

    fn keys<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.records.lock().await.keys().cloned().collect()) })
    }
}

/// Records in a JSON file mapping token digests to records.
pub struct FilePersistence {
    path: PathBuf,
    records: Mutex<HashMap<String, StoredToken>>,
}

impl FilePersistence {
    /// Load records from `path`.
    ///
    /// If the file doesn't exist, creates it as `{}`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let records = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| PersistenceError::Io(format!("reading token file: {e}")))?;
            let records: HashMap<String, StoredToken> = serde_json::from_str(&contents)
                .map_err(|e| PersistenceError::Parse(format!("parsing token file: {e}")))?;
            info!(path = %path.display(), tokens = records.len(), "loaded verification tokens");
            records
        } else {
            info!(path = %path.display(), "token file not found, starting empty");
            let records = HashMap::new();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenPersistence for FilePersistence {
    fn get<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<StoredToken>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.records.lock().await.get(key).cloned()) })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        record: &'a StoredToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            let previous = records.insert(key.to_string(), record.clone());
            if let Err(e) = write_atomic(&self.path, &records).await {
                // Keep memory in step with the file
                match previous {
                    Some(previous) => records.insert(key.to_string(), previous),
                    None => records.remove(key),
                };
                return Err(e);
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut records = self.records.lock().await;
            if let Some(removed) = records.remove(key) {
                if let Err(e) = write_atomic(&self.path, &records).await {
                    records.insert(key.to_string(), removed);
                    return Err(e);
                }
            }
            Ok(())
        })
    }

    fn keys<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async move { Ok(self.records.lock().await.keys().cloned().collect()) })
    }
}

/// Write records to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only).
async fn write_atomic(path: &Path, records: &HashMap<String, StoredToken>) -> Result<()> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| PersistenceError::Parse(format!("serializing tokens: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| PersistenceError::Io("token path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".tokens.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| PersistenceError::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| PersistenceError::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| PersistenceError::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), tokens = records.len(), "persisted verification tokens");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::TokenPurpose;

    fn record(email: &str) -> StoredToken {
        StoredToken::issued(email, TokenPurpose::PasswordReset, 1_735_500_000_000)
    }

    #[tokio::test]
    async fn memory_set_get_delete() {
        let persistence = MemoryPersistence::new();
        persistence.set("k1", &record("a@b.com")).await.unwrap();

        let got = persistence.get("k1").await.unwrap().unwrap();
        assert_eq!(got.subject_email, "a@b.com");
        assert_eq!(persistence.keys().await.unwrap(), vec!["k1".to_string()]);

        persistence.delete("k1").await.unwrap();
        assert!(persistence.get("k1").await.unwrap().is_none());
        // Deleting again is fine
        persistence.delete("k1").await.unwrap();
        assert!(persistence.is_empty().await);
    }

    #[tokio::test]
    async fn file_roundtrip_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let persistence = FilePersistence::load(path.clone()).await.unwrap();
        persistence.set("k1", &record("a@b.com")).await.unwrap();
        persistence.set("k2", &record("c@d.com")).await.unwrap();
        persistence.delete("k2").await.unwrap();

        let reloaded = FilePersistence::load(path).await.unwrap();
        assert_eq!(reloaded.get("k1").await.unwrap(), Some(record("a@b.com")));
        assert!(reloaded.get("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        assert!(!path.exists());
        let persistence = FilePersistence::load(path.clone()).await.unwrap();
        assert!(persistence.keys().await.unwrap().is_empty());
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, StoredToken> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = FilePersistence::load(path).await;
        assert!(matches!(result, Err(PersistenceError::Parse(_))));
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let persistence = FilePersistence::load(path).await.unwrap();

        // Removing the directory makes every subsequent write fail
        drop(dir);

        let result = persistence.set("k1", &record("a@b.com")).await;
        assert!(matches!(result, Err(PersistenceError::Io(_))));
        assert!(persistence.get("k1").await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let persistence = FilePersistence::load(path.clone()).await.unwrap();
        persistence.set("k1", &record("a@b.com")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }
}
