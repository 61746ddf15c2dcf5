//! Offline cache proxy for the bj-trainer web app.
//!
//! The proxy sits between the app and the network. It pre-caches the app
//! shell when a version is installed, serves every later request from the
//! cache when it can, and caches anything else (the card images) the first
//! time the network delivers it.
//!
//! - `proxy`: the `OfflineProxy` handlers
//! - `lifecycle`: worker states, events and the host `Registration`
//! - `cache`: named cache namespaces, in memory or on disk
//! - `network`: the `Fetcher` seam and its implementations
//! - `http`: request and consumed-once response types
//! - `cards`: card image naming for the trainer's deck

pub mod cache;
pub mod cards;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod network;
pub mod proxy;

pub use cache::{CacheNamespace, CacheStorage};
pub use config::{ProxyConfig, ASSETS, CACHE_NAME};
pub use error::{CacheError, FetchError, ProxyError};
pub use http::{Request, Response};
pub use lifecycle::{ClientControl, Event, EventKind, Outcome, Registration, WaitUntil, WorkerState};
pub use network::{Fetcher, HttpFetcher, StaticNetwork};
pub use proxy::OfflineProxy;
pub use reqwest::{Method, StatusCode, Url};
