use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::CacheError;
use crate::http::{Request, Response};

use super::CachedEntry;

/// On-disk layout of one namespace file
#[derive(Debug, Serialize, Deserialize)]
struct NamespaceFile {
    name: String,
    entries: Vec<CachedEntry>,
}

/// Summary of a stored entry, for listings
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub url: String,
    pub status: u16,
    pub size: usize,
    pub age: String,
}

/// One named, version-tagged store of request -> response entries.
///
/// Every write builds the next map, persists it, then swaps it in, so a failed
/// write leaves the namespace unchanged. Writes are serialized by the lock;
/// overlapping writes to one key resolve last-write-wins.
pub struct CacheNamespace {
    name: String,
    path: Option<PathBuf>,
    quota_bytes: Option<usize>,
    entries: RwLock<BTreeMap<String, CachedEntry>>,
    deleted: AtomicBool,
}

impl CacheNamespace {
    pub(crate) fn new(name: String, path: Option<PathBuf>, quota_bytes: Option<usize>) -> Self {
        Self {
            name,
            path,
            quota_bytes,
            entries: RwLock::new(BTreeMap::new()),
            deleted: AtomicBool::new(false),
        }
    }

    /// Load a namespace previously written to `path`
    pub(crate) async fn load(
        name: String,
        path: PathBuf,
        quota_bytes: Option<usize>,
    ) -> Result<Self, CacheError> {
        let contents = tokio::fs::read_to_string(&path).await?;
        let file: NamespaceFile = serde_json::from_str(&contents)?;
        debug!(cache = %name, entries = file.entries.len(), "Loaded cache namespace");

        let entries = file
            .entries
            .into_iter()
            .map(|entry| (entry.url.clone(), entry))
            .collect();

        Ok(Self {
            name,
            path: Some(path),
            quota_bytes,
            entries: RwLock::new(entries),
            deleted: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a stored response. Non-GET requests never match.
    pub async fn match_request(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        if !request.is_cacheable() {
            return Ok(None);
        }
        let entries = self.entries.read().await;
        match entries.get(&request.cache_key()) {
            Some(entry) => Ok(Some(entry.to_response()?)),
            None => Ok(None),
        }
    }

    /// Store a response, overwriting any entry for the same request.
    pub async fn put(&self, request: &Request, response: Response) -> Result<(), CacheError> {
        self.put_all(vec![(request.clone(), response)]).await
    }

    /// Store a batch of responses. Either all of them are written or none is.
    pub async fn put_all(&self, batch: Vec<(Request, Response)>) -> Result<(), CacheError> {
        let mut staged = Vec::with_capacity(batch.len());
        for (request, response) in batch {
            Self::check_storable(&request, &response)?;
            staged.push(CachedEntry::from_response(&request, response));
        }

        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        for entry in staged {
            next.insert(entry.url.clone(), entry);
        }
        self.check_quota(&next)?;
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    /// Remove the entry for a request. Returns whether one existed.
    pub async fn delete(&self, request: &Request) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        let key = request.cache_key();
        if !entries.contains_key(&key) {
            return Ok(false);
        }
        let mut next = entries.clone();
        next.remove(&key);
        self.persist(&next).await?;
        *entries = next;
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn entries(&self) -> Vec<EntryInfo> {
        self.entries
            .read()
            .await
            .values()
            .map(|entry| EntryInfo {
                url: entry.url.clone(),
                status: entry.status,
                size: entry.size(),
                age: entry.age_display(),
            })
            .collect()
    }

    /// Stop persisting and remove the backing file. Takes the write lock, so
    /// a write already in flight finishes its rename first and later writes
    /// see the flag.
    pub(crate) async fn mark_deleted(&self) -> Result<(), CacheError> {
        let _entries = self.entries.write().await;
        self.deleted.store(true, Ordering::SeqCst);
        if let Some(path) = &self.path {
            if path.exists() {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }

    fn check_storable(request: &Request, response: &Response) -> Result<(), CacheError> {
        if !request.is_cacheable() {
            return Err(CacheError::UnsupportedMethod(request.method().to_string()));
        }
        if response.status().as_u16() == 206 {
            return Err(CacheError::PartialContent(request.cache_key()));
        }
        Ok(())
    }

    fn check_quota(&self, next: &BTreeMap<String, CachedEntry>) -> Result<(), CacheError> {
        if let Some(quota) = self.quota_bytes {
            let needed: usize = next.values().map(CachedEntry::size).sum();
            if needed > quota {
                return Err(CacheError::QuotaExceeded { needed, quota });
            }
        }
        Ok(())
    }

    async fn persist(&self, entries: &BTreeMap<String, CachedEntry>) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if self.deleted.load(Ordering::SeqCst) {
            debug!(cache = %self.name, "Namespace was deleted, not persisting");
            return Ok(());
        }

        let file = NamespaceFile {
            name: self.name.clone(),
            entries: entries.values().cloned().collect(),
        };
        let contents = serde_json::to_string(&file)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::{Method, StatusCode, Url};

    fn get(path: &str) -> Request {
        Request::get(Url::parse("https://bj.example/").unwrap().join(path).unwrap())
    }

    fn namespace(quota: Option<usize>) -> CacheNamespace {
        CacheNamespace::new("bj-trainer-v1".to_string(), None, quota)
    }

    #[tokio::test]
    async fn test_put_then_match() {
        let cache = namespace(None);
        cache
            .put(&get("cards/AS.png"), Response::ok_with_body("ace"))
            .await
            .unwrap();

        let hit = cache.match_request(&get("cards/AS.png")).await.unwrap();
        assert_eq!(hit.unwrap().text().unwrap(), "ace");
        assert!(cache.match_request(&get("cards/KS.png")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reinsertion_overwrites() {
        let cache = namespace(None);
        cache.put(&get("index.html"), Response::ok_with_body("old")).await.unwrap();
        cache.put(&get("index.html"), Response::ok_with_body("new")).await.unwrap();

        assert_eq!(cache.len().await, 1);
        let hit = cache.match_request(&get("index.html")).await.unwrap().unwrap();
        assert_eq!(hit.text().unwrap(), "new");
    }

    #[tokio::test]
    async fn test_non_get_is_rejected_and_never_matches() {
        let cache = namespace(None);
        let url = Url::parse("https://bj.example/score").unwrap();
        let post = Request::new(Method::POST, url.clone());

        let err = cache.put(&post, Response::ok_with_body("x")).await.unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedMethod(m) if m == "POST"));

        cache.put(&Request::get(url), Response::ok_with_body("x")).await.unwrap();
        assert!(cache.match_request(&post).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_content_is_rejected() {
        let cache = namespace(None);
        let partial = Response::new(StatusCode::PARTIAL_CONTENT, HeaderMap::new(), "half");
        let err = cache.put(&get("cards/2H.png"), partial).await.unwrap_err();
        assert!(matches!(err, CacheError::PartialContent(_)));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_error_statuses_are_stored() {
        let cache = namespace(None);
        let missing = Response::new(StatusCode::NOT_FOUND, HeaderMap::new(), "nope");
        cache.put(&get("cards/XX.png"), missing).await.unwrap();

        let hit = cache.match_request(&get("cards/XX.png")).await.unwrap().unwrap();
        assert_eq!(hit.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let cache = namespace(Some(100));
        let batch = vec![
            (get("./"), Response::ok_with_body("shell")),
            (get("./index.html"), Response::ok_with_body("x".repeat(200))),
        ];

        let err = cache.put_all(batch).await.unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { quota: 100, .. }));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let cache = namespace(None);
        cache.put(&get("cards/JC.png"), Response::ok_with_body("jack")).await.unwrap();

        assert!(cache.delete(&get("cards/JC.png")).await.unwrap());
        assert!(!cache.delete(&get("cards/JC.png")).await.unwrap());
        assert!(cache.is_empty().await);
    }
}
