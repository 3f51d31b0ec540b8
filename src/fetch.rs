//! Shared HTTP client for scraping and image downloads.
//!
//! One client is built per process and reused everywhere: connection pooling,
//! a shared cookie jar (scraped sites often gate chapter pages behind
//! cookies), a bounded redirect policy and a desktop-browser User-Agent.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response};
use thiserror::Error;
use tracing::{debug, instrument};

/// Maximum redirect hops followed before giving up.
const MAX_REDIRECT_HOPS: usize = 5;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User-Agent impersonating a modern desktop browser.
///
/// Manga sources routinely reject non-browser agents, so both scraping and
/// image requests identify as Chrome.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Error type for fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request construction or transport failed.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A header name or value from a rule was not valid HTTP.
    #[error("invalid header {name:?} in rule")]
    InvalidHeader { name: String },
}

/// Shared HTTP client wrapper.
///
/// Cheap to clone; all clones share the same connection pool and cookie jar.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
}

impl Default for FetchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchClient {
    /// Creates a client with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a client with an explicit request timeout.
    ///
    /// Falls back to an unconfigured client if the builder rejects the
    /// configuration, which cannot happen with these static options.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECT_HOPS))
            .cookie_store(true)
            .gzip(true)
            .user_agent(DESKTOP_USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Sends a request with optional per-rule headers.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidHeader`] when a rule header is not valid
    /// HTTP, or [`FetchError::Transport`] on connection/timeout failure.
    /// Non-success statuses are not an error here; callers decide.
    #[instrument(skip(self, headers), fields(url = %url, method = %method))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<Response, FetchError> {
        let mut header_map = HeaderMap::new();
        if let Some(headers) = headers {
            for (name, value) in headers {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    FetchError::InvalidHeader { name: name.clone() }
                })?;
                let header_value = HeaderValue::from_str(value).map_err(|_| {
                    FetchError::InvalidHeader { name: name.clone() }
                })?;
                header_map.insert(header_name, header_value);
            }
        }

        debug!(header_count = header_map.len(), "sending request");
        self.client
            .request(method, url)
            .headers(header_map)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })
    }

    /// Convenience GET with optional headers.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub async fn get(
        &self,
        url: &str,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<Response, FetchError> {
        self.request(Method::GET, url, headers).await
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_sends_desktop_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ua"))
            .and(header("User-Agent", DESKTOP_USER_AGENT))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new();
        let response = client.get(&format!("{}/ua", server.uri()), None).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_rule_headers_are_applied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/headers"))
            .and(header("Referer", "https://example.com/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HashMap::new();
        headers.insert("Referer".to_string(), "https://example.com/".to_string());

        let client = FetchClient::new();
        let response = client
            .get(&format!("{}/headers", server.uri()), Some(&headers))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn test_invalid_header_name_is_rejected() {
        let mut headers = HashMap::new();
        headers.insert("bad header\n".to_string(), "x".to_string());

        let client = FetchClient::new();
        let result = client.get("http://localhost:1/ignored", Some(&headers)).await;
        assert!(matches!(result, Err(FetchError::InvalidHeader { .. })));
    }
}
