//! Host for the offline proxy.
//!
//! `App` plays the part of the platform: it owns the disk-backed cache
//! storage, the network, and the `Registration` that routes requests to the
//! installed proxy version.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cardcache_core::cards::{card_codes, card_path, is_card_code};
use cardcache_core::{
    CacheStorage, Fetcher, HttpFetcher, OfflineProxy, Registration, Request, Response,
    StaticNetwork, WorkerState,
};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::state::{InstallRecord, InstallState};

/// Subdirectory of the cache dir holding namespace files
const CACHES_DIR: &str = "caches";

/// Maximum concurrent card requests when warming the cache.
/// Keeps a small local server responsive while still finishing quickly.
const MAX_CONCURRENT_REQUESTS: usize = 8;

/// Listing of one cache namespace
#[derive(Debug)]
pub struct NamespaceStatus {
    pub name: String,
    pub current: bool,
    pub entries: Vec<cardcache_core::cache::EntryInfo>,
}

/// Result of requesting every card through the proxy
#[derive(Debug, Default, PartialEq, Eq)]
pub struct WarmSummary {
    pub cached: usize,
    pub missing: Vec<String>,
}

pub struct App {
    config: Config,
    storage: Arc<CacheStorage>,
    network: Arc<dyn Fetcher>,
    registration: Registration,
    state: InstallState,
}

impl App {
    pub fn new(config: Config, cache_dir: PathBuf, offline: bool) -> Result<Self> {
        let network: Arc<dyn Fetcher> = if offline {
            Arc::new(StaticNetwork::offline())
        } else {
            Arc::new(
                HttpFetcher::with_timeout(Duration::from_secs(config.request_timeout_secs))
                    .context("Failed to build HTTP client")?,
            )
        };
        Self::with_network(config, cache_dir, network)
    }

    pub fn with_network(config: Config, cache_dir: PathBuf, network: Arc<dyn Fetcher>) -> Result<Self> {
        let storage = CacheStorage::on_disk(cache_dir.join(CACHES_DIR))
            .with_context(|| format!("Failed to open cache directory {}", cache_dir.display()))?;

        let mut state = InstallState::new(cache_dir);
        if let Err(e) = state.load() {
            warn!(error = %e, "Ignoring unreadable install state");
        }

        Ok(Self {
            config,
            storage: Arc::new(storage),
            registration: Registration::new(network.clone()),
            network,
            state,
        })
    }

    fn proxy(&self) -> Result<OfflineProxy> {
        Ok(OfflineProxy::new(
            self.config.proxy_config()?,
            self.storage.clone(),
            self.network.clone(),
        ))
    }

    /// Install the configured version and remember it.
    pub async fn install(&mut self) -> Result<WorkerState> {
        let proxy = self.proxy()?;
        let version = proxy.version().to_string();
        let state = self
            .registration
            .register(proxy)
            .await
            .with_context(|| format!("Failed to install {} from {}", version, self.config.origin))?;

        self.state.update(InstallRecord::new(&version, &self.config.origin));
        self.state.save()?;
        info!(version = %version, state = %state, "Install finished");
        Ok(state)
    }

    /// Re-adopt the recorded install if it matches the configuration.
    /// Returns false when there is nothing to restore; requests then go
    /// straight to the network.
    pub async fn restore(&self) -> Result<bool> {
        let Some(record) = &self.state.record else {
            debug!("No install recorded");
            return Ok(false);
        };
        if !record.matches(&self.config.cache_name, &self.config.origin) {
            warn!(
                recorded = %record.version,
                configured = %self.config.cache_name,
                "Recorded install does not match configuration, run `cardcache install`"
            );
            return Ok(false);
        }

        match self.registration.restore(self.proxy()?).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "Could not restore recorded install");
                Ok(false)
            }
        }
    }

    /// Request `target` through the proxy. A card code such as `QD` stands
    /// for that card's image; anything else is a path relative to the origin.
    pub async fn get(&self, target: &str) -> Result<Option<Response>> {
        let path = if is_card_code(target) {
            card_path(target)
        } else {
            target.to_string()
        };
        let url = self.config.proxy_config()?.resolve(&path)?;
        let response = self.registration.fetch(Request::get(url)).await?;
        self.registration.drain().await;
        Ok(response)
    }

    /// Request every card image so the proxy caches it.
    pub async fn warm_cards(&self) -> Result<WarmSummary> {
        let proxy_config = self.config.proxy_config()?;
        let registration = &self.registration;

        let results: Vec<(String, bool)> = stream::iter(card_codes())
            .map(|code| {
                let url = proxy_config.resolve(&card_path(&code));
                async move {
                    let served = match url {
                        Ok(url) => match registration.fetch(Request::get(url)).await {
                            Ok(Some(response)) => response.ok(),
                            Ok(None) => false,
                            Err(e) => {
                                debug!(card = %code, error = %e, "Card request failed");
                                false
                            }
                        },
                        Err(e) => {
                            debug!(card = %code, error = %e, "Bad card path");
                            false
                        }
                    };
                    (code, served)
                }
            })
            .buffer_unordered(MAX_CONCURRENT_REQUESTS)
            .collect()
            .await;
        self.registration.drain().await;

        let mut summary = WarmSummary::default();
        for (code, served) in results {
            if served {
                summary.cached += 1;
            } else {
                summary.missing.push(code);
            }
        }
        summary.missing.sort();
        Ok(summary)
    }

    pub async fn status(&self) -> Result<Vec<NamespaceStatus>> {
        let mut listing = Vec::new();
        for name in self.storage.keys().await? {
            let namespace = self.storage.open(&name).await?;
            listing.push(NamespaceStatus {
                current: name == self.config.cache_name,
                entries: namespace.entries().await,
                name,
            });
        }
        Ok(listing)
    }

    /// Delete every namespace other than the configured version.
    pub async fn purge(&self) -> Result<Vec<String>> {
        Ok(self.proxy()?.purge_stale().await?)
    }

    /// Delete every namespace and forget the install. Returns how many
    /// namespaces were deleted.
    pub async fn reset(&mut self) -> Result<usize> {
        let mut deleted = 0;
        for name in self.storage.keys().await? {
            if self.storage.delete(&name).await? {
                deleted += 1;
            }
        }
        self.state.clear()?;
        Ok(deleted)
    }
}
