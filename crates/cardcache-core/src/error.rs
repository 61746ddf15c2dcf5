//! Error types for the offline cache proxy.
//!
//! Three layers, matching where a failure can happen:
//! - `FetchError`: the network could not produce a response at all
//! - `CacheError`: the cache storage refused or failed a read or write
//! - `ProxyError`: everything a lifecycle handler or host can report

use reqwest::StatusCode;
use thiserror::Error;

use crate::lifecycle::{EventKind, WorkerState};

/// Maximum length for a URL or path quoted in an error message
const MAX_QUOTED_LENGTH: usize = 200;

/// Transport-level failure of a fetch. An HTTP error status is not a
/// `FetchError`; the fetch resolved and carries that status.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("Unsupported request: {0}")]
    Unsupported(String),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Only GET requests can be cached, got {0}")]
    UnsupportedMethod(String),

    #[error("Partial content (206) cannot be cached: {0}")]
    PartialContent(String),

    #[error("Cache quota exceeded: {needed} bytes needed, {quota} bytes allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Invalid cache name: {0:?}")]
    InvalidName(String),

    #[error("Corrupt cache entry for {url}: {reason}")]
    Corrupt { url: String, reason: String },

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid asset path {path}: {reason}")]
    InvalidAsset { path: String, reason: String },

    #[error("Asset listed twice in manifest: {0}")]
    DuplicateAsset(String),

    #[error("Failed to fetch asset {path}: {source}")]
    AssetFetch {
        path: String,
        #[source]
        source: FetchError,
    },

    #[error("Asset {path} returned status {status}")]
    AssetStatus { path: String, status: StatusCode },

    #[error("Installation of {version} failed: {source}")]
    InstallFailed {
        version: String,
        #[source]
        source: Box<ProxyError>,
    },

    #[error("Version {0} is not installed")]
    NotInstalled(String),

    #[error("Illegal worker transition {from} -> {to}")]
    InvalidTransition { from: WorkerState, to: WorkerState },

    #[error("Worker in state {state} does not accept {kind} events")]
    UnexpectedEvent { kind: EventKind, state: WorkerState },

    #[error("Clients cannot be claimed by a worker in state {0}")]
    ClaimRejected(WorkerState),

    #[error("Response body is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Network(#[from] FetchError),
}

impl ProxyError {
    /// Quote a path or URL without flooding logs
    pub(crate) fn quote(raw: &str) -> String {
        if raw.len() <= MAX_QUOTED_LENGTH {
            raw.to_string()
        } else {
            let cut: String = raw.chars().take(MAX_QUOTED_LENGTH).collect();
            format!("{}... ({} bytes)", cut, raw.len())
        }
    }

    /// Error for a manifest asset whose fetch resolved with a non-success status
    pub fn from_status(path: &str, status: StatusCode) -> Self {
        ProxyError::AssetStatus {
            path: Self::quote(path),
            status,
        }
    }

    /// True when the error came from the network rather than the cache or lifecycle
    pub fn is_network(&self) -> bool {
        match self {
            ProxyError::Network(_) | ProxyError::AssetFetch { .. } => true,
            ProxyError::InstallFailed { source, .. } => source.is_network(),
            _ => false,
        }
    }
}
