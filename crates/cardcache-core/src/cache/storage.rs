use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::CacheError;

use super::CacheNamespace;

/// Extension used for namespace files on disk
const NAMESPACE_EXTENSION: &str = "json";

/// The set of named cache namespaces available to the proxy.
///
/// Namespaces live in memory, or in memory backed by one JSON file each
/// under a directory.
pub struct CacheStorage {
    root: Option<PathBuf>,
    quota_bytes: Option<usize>,
    namespaces: RwLock<HashMap<String, Arc<CacheNamespace>>>,
}

impl CacheStorage {
    pub fn in_memory() -> Self {
        Self {
            root: None,
            quota_bytes: None,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub fn on_disk(root: PathBuf) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root: Some(root),
            quota_bytes: None,
            namespaces: RwLock::new(HashMap::new()),
        })
    }

    /// Limit each namespace to `bytes` of stored URLs and bodies
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Open the namespace called `name`, creating it if absent.
    pub async fn open(&self, name: &str) -> Result<Arc<CacheNamespace>, CacheError> {
        Self::validate_name(name)?;

        if let Some(namespace) = self.namespaces.read().await.get(name) {
            return Ok(namespace.clone());
        }

        let mut namespaces = self.namespaces.write().await;
        // Another task may have opened it while we waited for the write lock
        if let Some(namespace) = namespaces.get(name) {
            return Ok(namespace.clone());
        }

        let namespace = match self.namespace_path(name) {
            Some(path) if path.exists() => {
                CacheNamespace::load(name.to_string(), path, self.quota_bytes).await?
            }
            Some(path) => {
                let created = CacheNamespace::new(name.to_string(), Some(path), self.quota_bytes);
                // An empty file makes the namespace visible to `keys` right away
                created.put_all(Vec::new()).await?;
                info!(cache = name, "Created cache namespace");
                created
            }
            None => {
                info!(cache = name, "Created cache namespace");
                CacheNamespace::new(name.to_string(), None, self.quota_bytes)
            }
        };

        let namespace = Arc::new(namespace);
        namespaces.insert(name.to_string(), namespace.clone());
        Ok(namespace)
    }

    pub async fn has(&self, name: &str) -> Result<bool, CacheError> {
        Self::validate_name(name)?;
        if self.namespaces.read().await.contains_key(name) {
            return Ok(true);
        }
        Ok(self
            .namespace_path(name)
            .map(|path| path.exists())
            .unwrap_or(false))
    }

    /// Delete a namespace and its entries. Returns whether it existed.
    ///
    /// Handles already opened stay readable but no longer persist.
    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        Self::validate_name(name)?;
        let mut namespaces = self.namespaces.write().await;

        let mut existed = false;
        if let Some(namespace) = namespaces.remove(name) {
            namespace.mark_deleted().await?;
            existed = true;
        }
        if let Some(path) = self.namespace_path(name) {
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
                existed = true;
            }
        }

        if existed {
            info!(cache = name, "Deleted cache namespace");
        }
        Ok(existed)
    }

    /// Names of all namespaces, sorted.
    pub async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names: BTreeSet<String> = self.namespaces.read().await.keys().cloned().collect();

        if let Some(root) = &self.root {
            let mut dir = tokio::fs::read_dir(root).await?;
            while let Some(entry) = dir.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(NAMESPACE_EXTENSION) {
                    continue;
                }
                match path.file_stem().and_then(|s| s.to_str()) {
                    Some(stem) if Self::validate_name(stem).is_ok() => {
                        names.insert(stem.to_string());
                    }
                    _ => debug!(path = %path.display(), "Ignoring unrecognized file in cache directory"),
                }
            }
        }

        Ok(names.into_iter().collect())
    }

    fn namespace_path(&self, name: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(format!("{}.{}", name, NAMESPACE_EXTENSION)))
    }

    fn validate_name(name: &str) -> Result<(), CacheError> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(CacheError::InvalidName(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Request, Response};
    use reqwest::Url;
    use tempfile::TempDir;

    fn card(code: &str) -> Request {
        let url = format!("https://bj.example/cards/{}.png", code);
        Request::get(Url::parse(&url).unwrap())
    }

    #[tokio::test]
    async fn test_open_returns_same_namespace() {
        let storage = CacheStorage::in_memory();
        let first = storage.open("bj-trainer-v1").await.unwrap();
        first.put(&card("AS"), Response::ok_with_body("ace")).await.unwrap();

        let second = storage.open("bj-trainer-v1").await.unwrap();
        assert_eq!(second.len().await, 1);
    }

    #[tokio::test]
    async fn test_versions_do_not_intermix() {
        let storage = CacheStorage::in_memory();
        let v1 = storage.open("bj-trainer-v1").await.unwrap();
        v1.put(&card("AS"), Response::ok_with_body("ace")).await.unwrap();

        let v2 = storage.open("bj-trainer-v2").await.unwrap();
        assert!(v2.match_request(&card("AS")).await.unwrap().is_none());
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["bj-trainer-v1".to_string(), "bj-trainer-v2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_names() {
        let storage = CacheStorage::in_memory();
        for name in ["", "../escape", ".hidden", "has space", "a/b"] {
            assert!(matches!(
                storage.open(name).await,
                Err(CacheError::InvalidName(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_disk_namespace_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let storage = CacheStorage::on_disk(dir.path().to_path_buf()).unwrap();
            let cache = storage.open("bj-trainer-v1").await.unwrap();
            cache.put(&card("10H"), Response::ok_with_body(vec![1u8, 2, 3])).await.unwrap();
        }

        let storage = CacheStorage::on_disk(dir.path().to_path_buf()).unwrap();
        assert!(storage.has("bj-trainer-v1").await.unwrap());
        let cache = storage.open("bj-trainer-v1").await.unwrap();
        let hit = cache.match_request(&card("10H")).await.unwrap().unwrap();
        assert_eq!(hit.into_body().as_ref(), &[1u8, 2, 3]);
    }

    #[tokio::test]
    async fn test_open_creates_file_immediately() {
        let dir = TempDir::new().unwrap();
        let storage = CacheStorage::on_disk(dir.path().to_path_buf()).unwrap();
        storage.open("bj-trainer-v1").await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let reopened = CacheStorage::on_disk(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.keys().await.unwrap(), vec!["bj-trainer-v1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_removes_file_and_stops_persisting() {
        let dir = TempDir::new().unwrap();
        let storage = CacheStorage::on_disk(dir.path().to_path_buf()).unwrap();
        let stale = storage.open("bj-trainer-v0").await.unwrap();

        assert!(storage.delete("bj-trainer-v0").await.unwrap());
        assert!(!storage.delete("bj-trainer-v0").await.unwrap());

        // Writes through an old handle do not resurrect the file
        stale.put(&card("5C"), Response::ok_with_body("five")).await.unwrap();
        assert!(!storage.has("bj-trainer-v0").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delete_racing_a_write_stays_deleted() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(CacheStorage::on_disk(dir.path().to_path_buf()).unwrap());

        for _ in 0..50 {
            let stale = storage.open("bj-trainer-v0").await.unwrap();
            let writer = tokio::spawn(async move {
                stale
                    .put(&card("AS"), Response::ok_with_body(vec![7u8; 200_000]))
                    .await
            });
            tokio::task::yield_now().await;

            storage.delete("bj-trainer-v0").await.unwrap();
            writer.await.unwrap().unwrap();

            assert!(!storage.has("bj-trainer-v0").await.unwrap());
            assert!(storage.keys().await.unwrap().is_empty());
        }
    }
}
