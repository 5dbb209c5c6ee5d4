use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use adx_types::DspInfo;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Other(String),
}

/// Narrow seam over whatever holds the DSP definition documents. The
/// production S3-style client lives outside this crate; tests and dev
/// runs use [`FsObjectStore`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys under `prefix`, lexicographically sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Directory-backed object store. Keys are paths relative to the root.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let key = relative_key(&self.root, &path);
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Pulls the full DSP definition set from the object store.
///
/// Individual files that fail to download, fail to parse, or carry an
/// empty `dsp_id` are skipped with a warning; the scan keeps the rest.
pub struct DefinitionLoader {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    error_count: AtomicU64,
}

impl DefinitionLoader {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            error_count: AtomicU64::new(0),
        }
    }

    pub async fn read_all(&self) -> Result<HashMap<String, DspInfo>, StoreError> {
        let keys = self.store.list(&self.prefix).await?;
        let mut definitions = HashMap::new();

        for key in keys.iter().filter(|k| k.ends_with(".json")) {
            let bytes = match self.store.get(key).await {
                Ok(b) => b,
                Err(e) => {
                    warn!("failed to fetch DSP file {}: {}", key, e);
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let info: DspInfo = match serde_json::from_slice(&bytes) {
                Ok(i) => i,
                Err(e) => {
                    warn!("failed to parse DSP file {}: {}", key, e);
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            if info.dsp_id.is_empty() {
                warn!("rejecting DSP file {}: empty dsp_id", key);
                self.error_count.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            // Lexicographic enumeration makes "last wins" reproducible.
            if definitions.insert(info.dsp_id.clone(), info).is_some() {
                warn!("duplicate dsp_id in {}: keeping later file", key);
            }
        }

        debug!(
            "definition scan: {} documents under {:?}",
            definitions.len(),
            self.prefix
        );
        Ok(definitions)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(dir: &Path, name: &str, body: &str) {
        tokio::fs::write(dir.join(name), body).await.unwrap();
    }

    #[tokio::test]
    async fn reads_all_valid_definitions() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "dsp-a.json",
            r#"{"dsp_id": "a", "endpoint": "http://a", "status": "active"}"#,
        )
        .await;
        write(
            dir.path(),
            "dsp-b.json",
            r#"{"dsp_id": "b", "endpoint": "http://b"}"#,
        )
        .await;
        write(dir.path(), "notes.txt", "ignored").await;

        let loader = DefinitionLoader::new(Arc::new(FsObjectStore::new(dir.path())), "");
        let defs = loader.read_all().await.unwrap();
        assert_eq!(defs.len(), 2);
        assert!(defs.contains_key("a"));
        assert_eq!(loader.error_count(), 0);
    }

    #[tokio::test]
    async fn rejects_bad_files_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad.json", "{not json").await;
        write(dir.path(), "empty-id.json", r#"{"dsp_id": "", "endpoint": "http://x"}"#).await;
        write(
            dir.path(),
            "good.json",
            r#"{"dsp_id": "ok", "endpoint": "http://ok"}"#,
        )
        .await;

        let loader = DefinitionLoader::new(Arc::new(FsObjectStore::new(dir.path())), "");
        let defs = loader.read_all().await.unwrap();
        assert_eq!(defs.len(), 1);
        assert!(defs.contains_key("ok"));
        assert_eq!(loader.error_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_id_last_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "1-first.json",
            r#"{"dsp_id": "d", "endpoint": "http://first"}"#,
        )
        .await;
        write(
            dir.path(),
            "2-second.json",
            r#"{"dsp_id": "d", "endpoint": "http://second"}"#,
        )
        .await;

        let loader = DefinitionLoader::new(Arc::new(FsObjectStore::new(dir.path())), "");
        let defs = loader.read_all().await.unwrap();
        assert_eq!(defs["d"].endpoint, "http://second");
    }

    #[tokio::test]
    async fn prefix_filters_and_recurses() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("dsps/cn")).await.unwrap();
        write(
            &dir.path().join("dsps/cn"),
            "a.json",
            r#"{"dsp_id": "cn-a", "endpoint": "http://a"}"#,
        )
        .await;
        write(
            dir.path(),
            "other.json",
            r#"{"dsp_id": "outside", "endpoint": "http://o"}"#,
        )
        .await;

        let loader = DefinitionLoader::new(Arc::new(FsObjectStore::new(dir.path())), "dsps/");
        let defs = loader.read_all().await.unwrap();
        assert_eq!(defs.len(), 1);
        assert!(defs.contains_key("cn-a"));
    }
}
