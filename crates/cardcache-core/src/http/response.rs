use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};

use crate::error::ProxyError;

/// A response from the network or the cache.
///
/// Deliberately not `Clone`: reading the body consumes the response. Use
/// [`Response::tee`] to get two copies that can be consumed independently.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Option<Url>,
    body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            url: None,
            body: body.into(),
        }
    }

    /// A 200 response with no headers
    pub fn ok_with_body(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, HeaderMap::new(), body)
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// True for 2xx statuses
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// URL the response was produced for, when known
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Split into two responses whose bodies are read independently.
    pub fn tee(self) -> (Response, Response) {
        let copy = Response {
            status: self.status,
            headers: self.headers.clone(),
            url: self.url.clone(),
            body: self.body.clone(),
        };
        (self, copy)
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn text(self) -> Result<String, ProxyError> {
        Ok(String::from_utf8(self.body.to_vec())?)
    }

    pub(crate) fn into_parts(self) -> (StatusCode, HeaderMap, Option<Url>, Bytes) {
        (self.status, self.headers, self.url, self.body)
    }
}
