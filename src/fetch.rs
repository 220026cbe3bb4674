//! Remote fetch functions handed to the API cache on a miss.

use crate::cache::RequestHeaders;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use std::time::Duration;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the value for an identifier. Opaque to the cache.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(
        &self,
        identifier: &str,
        headers: &RequestHeaders,
    ) -> std::result::Result<serde_json::Value, BoxError>;
}

/// `GET`s the identifier as a URL and decodes the JSON body.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> std::result::Result<Self, BoxError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> std::result::Result<Self, BoxError> {
        let mut defaults = HeaderMap::new();
        defaults.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("tiercache/", env!("CARGO_PKG_VERSION"))),
        );
        defaults.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let client = reqwest::Client::builder()
            .default_headers(defaults)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(
        &self,
        identifier: &str,
        headers: &RequestHeaders,
    ) -> std::result::Result<serde_json::Value, BoxError> {
        let url = url::Url::parse(identifier)?;
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
