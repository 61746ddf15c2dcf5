use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};

use crate::error::FetchError;
use crate::http::{Request, Response};

use super::Fetcher;

struct Route {
    status: StatusCode,
    body: Bytes,
    fails: bool,
    calls: AtomicUsize,
}

/// A network with a fixed set of routes.
///
/// Unknown URLs answer 404, routes marked failing error out, and the whole
/// network can be taken offline. Every call is counted, including calls made
/// while offline.
pub struct StaticNetwork {
    routes: HashMap<String, Route>,
    online: AtomicBool,
    calls: AtomicUsize,
}

impl StaticNetwork {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            online: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        }
    }

    /// A network where every fetch fails
    pub fn offline() -> Self {
        let network = Self::new();
        network.set_online(false);
        network
    }

    pub fn with_route(self, url: &Url, body: impl Into<Bytes>) -> Self {
        self.with_response(url, StatusCode::OK, body)
    }

    pub fn with_response(mut self, url: &Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        self.routes.insert(
            Self::key(url),
            Route {
                status,
                body: body.into(),
                fails: false,
                calls: AtomicUsize::new(0),
            },
        );
        self
    }

    /// Requests for `url` fail as if the connection dropped
    pub fn with_failure(mut self, url: &Url) -> Self {
        self.routes.insert(
            Self::key(url),
            Route {
                status: StatusCode::OK,
                body: Bytes::new(),
                fails: true,
                calls: AtomicUsize::new(0),
            },
        );
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Total fetches attempted
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fetches attempted for one routed URL
    pub fn calls_for(&self, url: &Url) -> usize {
        self.routes
            .get(&Self::key(url))
            .map(|route| route.calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn key(url: &Url) -> String {
        let mut url = url.clone();
        url.set_fragment(None);
        url.to_string()
    }
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for StaticNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let route = self.routes.get(&request.cache_key());
        if let Some(route) = route {
            route.calls.fetch_add(1, Ordering::SeqCst);
        }

        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Offline(request.url().to_string()));
        }

        match route {
            Some(route) if route.fails => Err(FetchError::Offline(format!(
                "connection reset fetching {}",
                request.url()
            ))),
            Some(route) => Ok(Response::new(route.status, HeaderMap::new(), route.body.clone())
                .with_url(request.url().clone())),
            None => Ok(Response::new(StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new())
                .with_url(request.url().clone())),
        }
    }
}
