use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::FetchError;
use crate::http::{Request, Response};

use super::Fetcher;

/// HTTP request timeout in seconds.
/// 30s allows for slow origins while still failing a dead connection.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fetcher backed by a reqwest client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        let scheme = request.url().scheme();
        if scheme != "http" && scheme != "https" {
            return Err(FetchError::Unsupported(format!(
                "{} scheme in {}",
                scheme,
                request.url()
            )));
        }

        let response = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;
        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "Network response");

        Ok(Response::new(status, headers, body).with_url(url))
    }
}
