//! Network access for the proxy.
//!
//! The proxy only sees the `Fetcher` trait. `HttpFetcher` talks to a real
//! origin with reqwest; `StaticNetwork` serves canned responses and can be
//! switched offline.

pub mod client;
pub mod fixed;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::http::{Request, Response};

pub use client::HttpFetcher;
pub use fixed::StaticNetwork;

/// Issues a request to the network.
///
/// Resolves with a response for any HTTP status; fails only when no response
/// could be obtained.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError>;
}
