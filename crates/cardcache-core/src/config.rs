//! Proxy configuration: the cache version tag and the asset manifest.
//!
//! Both are compile-time constants. `ProxyConfig` exists so a host can point
//! the proxy at a scope URL and so tests can swap the version or manifest.

use std::collections::HashSet;

use reqwest::Url;

use crate::error::ProxyError;
use crate::http::Request;

/// Version-tagged name of the active cache namespace.
/// Bump the version to start from an empty cache on the next install.
pub const CACHE_NAME: &str = "bj-trainer-v1";

/// Shell assets that must be cached before the proxy activates
pub const ASSETS: &[&str] = &["./", "./index.html"];

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    scope: Url,
    cache_name: String,
    assets: Vec<String>,
    purge_stale_caches: bool,
    skip_waiting: bool,
}

impl ProxyConfig {
    /// Defaults for an app served under `scope`
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            cache_name: CACHE_NAME.to_string(),
            assets: ASSETS.iter().map(|s| s.to_string()).collect(),
            purge_stale_caches: false,
            skip_waiting: true,
        }
    }

    pub fn with_cache_name(mut self, cache_name: impl Into<String>) -> Self {
        self.cache_name = cache_name.into();
        self
    }

    pub fn with_assets<I, S>(mut self, assets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assets = assets.into_iter().map(Into::into).collect();
        self
    }

    /// Delete other namespaces when this version activates
    pub fn with_purge_stale_caches(mut self, purge: bool) -> Self {
        self.purge_stale_caches = purge;
        self
    }

    /// Whether a successful install asks the host to activate immediately.
    /// Off means the new version waits for open app instances to close.
    pub fn with_skip_waiting(mut self, skip: bool) -> Self {
        self.skip_waiting = skip;
        self
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn purge_stale_caches(&self) -> bool {
        self.purge_stale_caches
    }

    pub fn skip_waiting(&self) -> bool {
        self.skip_waiting
    }

    /// Resolve a path relative to the scope
    pub fn resolve(&self, path: &str) -> Result<Url, ProxyError> {
        self.scope.join(path).map_err(|e| ProxyError::InvalidAsset {
            path: ProxyError::quote(path),
            reason: e.to_string(),
        })
    }

    /// GET requests for every manifest asset, in manifest order, paired with
    /// the path they came from. Two paths resolving to one URL is an error.
    pub fn asset_requests(&self) -> Result<Vec<(String, Request)>, ProxyError> {
        let mut seen = HashSet::new();
        let mut requests = Vec::with_capacity(self.assets.len());
        for path in &self.assets {
            let request = Request::get(self.resolve(path)?);
            if !seen.insert(request.cache_key()) {
                return Err(ProxyError::DuplicateAsset(ProxyError::quote(path)));
            }
            requests.push((path.clone(), request));
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Url {
        Url::parse("https://bj.example/trainer/").unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::new(scope());
        assert_eq!(config.cache_name(), "bj-trainer-v1");
        assert_eq!(config.assets(), &["./".to_string(), "./index.html".to_string()]);
        assert!(!config.purge_stale_caches());
        assert!(config.skip_waiting());
    }

    #[test]
    fn test_asset_requests_resolve_against_scope() {
        let config = ProxyConfig::new(scope());
        let urls: Vec<String> = config
            .asset_requests()
            .unwrap()
            .into_iter()
            .map(|(_, request)| request.url().to_string())
            .collect();
        assert_eq!(
            urls,
            vec![
                "https://bj.example/trainer/".to_string(),
                "https://bj.example/trainer/index.html".to_string(),
            ]
        );
    }

    #[test]
    fn test_duplicate_assets_rejected() {
        let config = ProxyConfig::new(scope()).with_assets(["./index.html", "index.html"]);
        assert!(matches!(
            config.asset_requests(),
            Err(ProxyError::DuplicateAsset(p)) if p == "index.html"
        ));
    }
}
