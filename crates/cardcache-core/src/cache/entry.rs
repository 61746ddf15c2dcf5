use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::http::{Request, Response};

/// A stored response, stamped with the time it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEntry {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
    pub cached_at: DateTime<Utc>,
}

impl CachedEntry {
    pub(crate) fn from_response(request: &Request, response: Response) -> Self {
        let (status, headers, _, body) = response.into_parts();
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Self {
            url: request.cache_key(),
            status: status.as_u16(),
            headers,
            body,
            cached_at: Utc::now(),
        }
    }

    /// Rebuild a response the caller can consume. The entry itself stays cached.
    pub(crate) fn to_response(&self) -> Result<Response, CacheError> {
        let status = StatusCode::from_u16(self.status).map_err(|e| CacheError::Corrupt {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!(url = %self.url, header = %name, "Skipping unreadable cached header"),
            }
        }

        let response = Response::new(status, headers, self.body.clone());
        Ok(match Url::parse(&self.url) {
            Ok(url) => response.with_url(url),
            Err(_) => response,
        })
    }

    /// Bytes this entry counts against a quota
    pub fn size(&self) -> usize {
        self.url.len() + self.body.len()
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Negative ages come from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = (minutes + 30) / 60;
            format!("{}h ago", hours)
        } else {
            let days = (minutes + 720) / 1440;
            format!("{}d ago", days)
        }
    }
}

mod body_base64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reqwest::header::CONTENT_TYPE;

    fn entry() -> CachedEntry {
        let request = Request::get(Url::parse("https://bj.example/cards/QD.png").unwrap());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
        let response = Response::new(StatusCode::OK, headers, vec![0u8, 159, 146, 150]);
        CachedEntry::from_response(&request, response)
    }

    #[test]
    fn test_age_display() {
        let mut cached = entry();
        assert_eq!(cached.age_display(), "just now");

        cached.cached_at = Utc::now() - Duration::minutes(5);
        assert_eq!(cached.age_display(), "5m ago");

        cached.cached_at = Utc::now() - Duration::minutes(95);
        assert_eq!(cached.age_display(), "2h ago");

        cached.cached_at = Utc::now() - Duration::hours(80);
        assert_eq!(cached.age_display(), "3d ago");

        cached.cached_at = Utc::now() + Duration::minutes(10);
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_binary_body_survives_json() {
        let cached = entry();
        let json = serde_json::to_string(&cached).unwrap();
        let restored: CachedEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.body, cached.body);

        let response = restored.to_response().unwrap();
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(response.url().unwrap().as_str(), "https://bj.example/cards/QD.png");
    }

    #[test]
    fn test_bad_status_is_corrupt() {
        let mut cached = entry();
        cached.status = 42;
        assert!(matches!(cached.to_response(), Err(CacheError::Corrupt { .. })));
    }
}
