//! The offline cache proxy: install, activate and request interception.
//!
//! Requests are served cache-first. On a miss the network answers and a copy
//! of its response is stored by a detached task, so the next identical request
//! never reaches the network. When the network fails on a miss the result is
//! the (empty) cache lookup, not a synthesized offline page.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::{CacheNamespace, CacheStorage};
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::{Request, Response};
use crate::lifecycle::{ClientControl, Event, EventKind, Outcome, WaitUntil};
use crate::network::Fetcher;

/// One version of the proxy. Clone is cheap and shares the cache handle,
/// network and background tasks.
#[derive(Clone)]
pub struct OfflineProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    config: ProxyConfig,
    storage: Arc<CacheStorage>,
    network: Arc<dyn Fetcher>,
    background: TaskTracker,
}

impl OfflineProxy {
    pub fn new(config: ProxyConfig, storage: Arc<CacheStorage>, network: Arc<dyn Fetcher>) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                config,
                storage,
                network,
                background: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.inner.config
    }

    /// The version tag, which is also the cache namespace name
    pub fn version(&self) -> &str {
        self.inner.config.cache_name()
    }

    pub fn storage(&self) -> &Arc<CacheStorage> {
        &self.inner.storage
    }

    /// Map an event to its pending action. The action runs when the returned
    /// token is settled.
    pub fn dispatch(&self, event: Event, host: Arc<dyn ClientControl>) -> WaitUntil {
        let proxy = self.clone();
        match event {
            Event::Install => WaitUntil::new(EventKind::Install, async move {
                proxy.install(host.as_ref()).await
            }),
            Event::Activate => WaitUntil::new(EventKind::Activate, async move {
                proxy.activate(host.as_ref()).await
            }),
            Event::Fetch(request) => WaitUntil::new(EventKind::Fetch, async move {
                proxy.intercept(request).await
            }),
        }
    }

    /// Wait for every detached cache write started so far.
    pub async fn drain(&self) {
        let tracker = &self.inner.background;
        tracker.close();
        tracker.wait().await;
        tracker.reopen();
    }

    /// Detached cache writes still running
    pub fn pending_writes(&self) -> usize {
        self.inner.background.len()
    }

    /// Delete every namespace except this version's. Returns the deleted names.
    pub async fn purge_stale(&self) -> Result<Vec<String>, ProxyError> {
        let storage = &self.inner.storage;
        let mut purged = Vec::new();
        for name in storage.keys().await? {
            if name != self.version() && storage.delete(&name).await? {
                purged.push(name);
            }
        }
        if !purged.is_empty() {
            info!(version = self.version(), purged = ?purged, "Purged stale caches");
        }
        Ok(purged)
    }

    async fn install(&self, host: &dyn ClientControl) -> Result<Outcome, ProxyError> {
        let cache = self.inner.storage.open(self.version()).await?;
        let requests = self.inner.config.asset_requests()?;
        info!(version = self.version(), assets = requests.len(), "Caching app shell");

        let fetches = requests.into_iter().map(|(path, request)| {
            let network = self.inner.network.clone();
            async move {
                let response = network
                    .fetch(request.clone())
                    .await
                    .map_err(|source| ProxyError::AssetFetch {
                        path: ProxyError::quote(&path),
                        source,
                    })?;
                if !response.ok() {
                    return Err(ProxyError::from_status(&path, response.status()));
                }
                Ok((request, response))
            }
        });
        let batch = futures::future::try_join_all(fetches).await?;

        let cached = batch.len();
        cache.put_all(batch).await?;
        if self.inner.config.skip_waiting() {
            host.skip_waiting().await;
        }
        info!(version = self.version(), cached, "App shell cached");
        Ok(Outcome::Installed { cached })
    }

    async fn activate(&self, host: &dyn ClientControl) -> Result<Outcome, ProxyError> {
        let purged = if self.inner.config.purge_stale_caches() {
            self.purge_stale().await?
        } else {
            Vec::new()
        };
        host.claim().await?;
        info!(version = self.version(), "Claimed open clients");
        Ok(Outcome::Activated { purged })
    }

    async fn intercept(&self, request: Request) -> Result<Outcome, ProxyError> {
        let cache = match self.inner.storage.open(self.version()).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(version = self.version(), error = %e, "Cache unavailable, using network only");
                None
            }
        };

        let cached = match &cache {
            Some(cache) => Self::lookup(cache, &request).await,
            None => None,
        };
        if cached.is_some() {
            debug!(url = %request.url(), "Cache hit");
            return Ok(Outcome::Responded(cached));
        }

        match self.inner.network.fetch(request.clone()).await {
            Ok(response) => {
                debug!(url = %request.url(), status = response.status().as_u16(), "Cache miss, served from network");
                let (response, copy) = response.tee();
                if let Some(cache) = cache {
                    self.store_detached(cache, request, copy);
                }
                Ok(Outcome::Responded(Some(response)))
            }
            Err(e) => {
                debug!(url = %request.url(), error = %e, "Cache miss and network failed");
                Ok(Outcome::Responded(cached))
            }
        }
    }

    async fn lookup(cache: &CacheNamespace, request: &Request) -> Option<Response> {
        match cache.match_request(request).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(url = %request.url(), error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Store `response` without making anyone wait for it. Failures are logged
    /// and dropped.
    fn store_detached(&self, cache: Arc<CacheNamespace>, request: Request, response: Response) {
        self.inner.background.spawn(async move {
            match cache.put(&request, response).await {
                Ok(()) => debug!(url = %request.url(), cache = cache.name(), "Cached response"),
                Err(e) => debug!(url = %request.url(), error = %e, "Discarded cache write"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use reqwest::{Method, StatusCode, Url};

    use crate::network::StaticNetwork;

    #[derive(Default)]
    struct RecordingHost {
        skipped: AtomicBool,
        claimed: AtomicBool,
    }

    #[async_trait]
    impl ClientControl for RecordingHost {
        async fn skip_waiting(&self) {
            self.skipped.store(true, Ordering::SeqCst);
        }

        async fn claim(&self) -> Result<(), ProxyError> {
            self.claimed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn scope() -> Url {
        Url::parse("https://bj.example/").unwrap()
    }

    fn url(path: &str) -> Url {
        scope().join(path).unwrap()
    }

    fn proxy(network: Arc<StaticNetwork>) -> (OfflineProxy, Arc<CacheStorage>) {
        let storage = Arc::new(CacheStorage::in_memory());
        let proxy = OfflineProxy::new(ProxyConfig::new(scope()), storage.clone(), network);
        (proxy, storage)
    }

    async fn fetch(proxy: &OfflineProxy, request: Request) -> Option<Response> {
        let host: Arc<dyn ClientControl> = Arc::new(RecordingHost::default());
        match proxy.dispatch(Event::Fetch(request), host).settle().await.unwrap() {
            Outcome::Responded(response) => response,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_install_caches_manifest_and_skips_waiting() {
        let network = Arc::new(
            StaticNetwork::new()
                .with_route(&url("./"), "shell")
                .with_route(&url("index.html"), "<html>"),
        );
        let (proxy, storage) = proxy(network);
        let host = Arc::new(RecordingHost::default());

        let outcome = proxy.dispatch(Event::Install, host.clone()).settle().await.unwrap();
        assert!(matches!(outcome, Outcome::Installed { cached: 2 }));
        assert!(host.skipped.load(Ordering::SeqCst));

        let cache = storage.open("bj-trainer-v1").await.unwrap();
        for path in ["./", "index.html"] {
            let request = Request::get(url(path));
            assert!(cache.match_request(&request).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_install_rejects_error_status() {
        let network = Arc::new(StaticNetwork::new().with_route(&url("./"), "shell"));
        let (proxy, storage) = proxy(network);
        let host = Arc::new(RecordingHost::default());

        let err = proxy.dispatch(Event::Install, host.clone()).settle().await.unwrap_err();
        assert!(matches!(err, ProxyError::AssetStatus { status, .. } if status == StatusCode::NOT_FOUND));
        assert!(!host.skipped.load(Ordering::SeqCst));
        assert!(storage.open("bj-trainer-v1").await.unwrap().is_empty().await);
    }

    #[tokio::test]
    async fn test_activate_claims_clients() {
        let (proxy, _) = proxy(Arc::new(StaticNetwork::new()));
        let host = Arc::new(RecordingHost::default());

        let outcome = proxy.dispatch(Event::Activate, host.clone()).settle().await.unwrap();
        assert!(matches!(outcome, Outcome::Activated { purged } if purged.is_empty()));
        assert!(host.claimed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_miss_goes_to_network_then_hits_cache() {
        let card = url("cards/AS.png");
        let network = Arc::new(StaticNetwork::new().with_route(&card, "ace"));
        let (proxy, _) = proxy(network.clone());

        let first = fetch(&proxy, Request::get(card.clone())).await.unwrap();
        assert_eq!(first.text().unwrap(), "ace");
        proxy.drain().await;

        let second = fetch(&proxy, Request::get(card.clone())).await.unwrap();
        assert_eq!(second.text().unwrap(), "ace");
        assert_eq!(network.calls_for(&card), 1);
        assert_eq!(proxy.pending_writes(), 0);
    }

    #[tokio::test]
    async fn test_hit_never_touches_network() {
        let card = url("cards/KH.png");
        let network = Arc::new(StaticNetwork::offline());
        let (proxy, storage) = proxy(network.clone());
        storage
            .open("bj-trainer-v1")
            .await
            .unwrap()
            .put(&Request::get(card.clone()), Response::ok_with_body("king"))
            .await
            .unwrap();

        let hit = fetch(&proxy, Request::get(card)).await.unwrap();
        assert_eq!(hit.text().unwrap(), "king");
        assert_eq!(network.calls(), 0);
    }

    #[tokio::test]
    async fn test_cold_miss_offline_is_absent() {
        let network = Arc::new(StaticNetwork::offline());
        let (proxy, _) = proxy(network.clone());

        assert!(fetch(&proxy, Request::get(url("cards/7D.png"))).await.is_none());
        assert_eq!(network.calls(), 1);
    }

    #[tokio::test]
    async fn test_uncacheable_response_still_returned() {
        let score = url("score");
        let network = Arc::new(StaticNetwork::new().with_route(&score, "saved"));
        let (proxy, storage) = proxy(network.clone());

        let post = Request::new(Method::POST, score.clone());
        let response = fetch(&proxy, post.clone()).await.unwrap();
        assert_eq!(response.text().unwrap(), "saved");
        proxy.drain().await;

        assert!(storage.open("bj-trainer-v1").await.unwrap().is_empty().await);
        fetch(&proxy, post).await.unwrap();
        assert_eq!(network.calls_for(&score), 2);
    }

    #[tokio::test]
    async fn test_partial_content_returned_but_not_stored() {
        let card = url("cards/AS.png");
        let network = Arc::new(StaticNetwork::new().with_response(
            &card,
            StatusCode::PARTIAL_CONTENT,
            "ac",
        ));
        let (proxy, storage) = proxy(network.clone());

        let response = fetch(&proxy, Request::get(card.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.text().unwrap(), "ac");
        proxy.drain().await;

        assert!(storage.open("bj-trainer-v1").await.unwrap().is_empty().await);
        fetch(&proxy, Request::get(card.clone())).await.unwrap();
        assert_eq!(network.calls_for(&card), 2);
    }

    #[tokio::test]
    async fn test_purge_stale_keeps_current_version() {
        let (proxy, storage) = proxy(Arc::new(StaticNetwork::new()));
        storage.open("bj-trainer-v0").await.unwrap();
        storage.open("bj-trainer-v1").await.unwrap();

        assert_eq!(proxy.purge_stale().await.unwrap(), vec!["bj-trainer-v0".to_string()]);
        assert_eq!(storage.keys().await.unwrap(), vec!["bj-trainer-v1".to_string()]);
    }
}
