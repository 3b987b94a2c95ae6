//! HTTP retrieval for one feed: conditional GET, size-capped body read,
//! validator capture, and failure classification.

use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;

use crate::feed::conditional::conditional_headers;
use crate::policy::{HostDecision, HostPolicy};
use crate::storage::FetchTarget;

/// Body cap used when no configured limit is in scope (override paths).
pub(crate) const DEFAULT_MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Errors that can occur while fetching a feed.
///
/// Everything except [`FetchError::HostBlacklisted`] feeds the health
/// state machine as a plain failure; the blacklist is a policy decision,
/// not a feed fault.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Host policy rejected the URL before any network I/O
    #[error("host is blacklisted")]
    HostBlacklisted,
    /// 2xx response carrying no body at all
    #[error("empty response body")]
    Empty,
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,
    /// HTTP response with a non-2xx, non-304 status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size cap
    #[error("response too large")]
    TooLarge,
    /// Response was incomplete (fewer bytes than Content-Length promised)
    #[error("incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
}

/// A successfully retrieved response with its cache validators.
#[derive(Debug)]
pub struct RawResponse {
    pub bytes: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Charset from the Content-Type header, authoritative over any XML
    /// declaration in the body.
    pub charset: Option<String>,
}

/// Result of a fetch: fresh bytes, or confirmation nothing changed.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(RawResponse),
    NotModified,
}

/// Fetch one feed.
///
/// The blacklist gate runs before any network I/O. A host-specific fetch
/// override (consent interstitials and the like) replaces the plain
/// conditional GET entirely; otherwise the stored validators are sent and
/// a 304 comes back as [`FetchOutcome::NotModified`].
pub async fn fetch(
    client: &reqwest::Client,
    policy: &HostPolicy,
    target: &FetchTarget<'_>,
    timeout: Duration,
    max_bytes: usize,
) -> Result<FetchOutcome, FetchError> {
    if policy.check_blacklist(target.fetch_url) == HostDecision::Rejected {
        return Err(FetchError::HostBlacklisted);
    }

    if let Some(strategy) = policy.fetch_override(target.site_url, target.fetch_url) {
        tracing::debug!(
            url = %target.fetch_url,
            strategy = strategy.name(),
            "Using fetch override"
        );
        let raw = tokio::time::timeout(timeout, strategy.fetch(client, target.fetch_url))
            .await
            .map_err(|_| FetchError::Timeout)??;
        return Ok(FetchOutcome::Fetched(raw));
    }

    let request = client
        .get(target.fetch_url)
        .headers(conditional_headers(target));

    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Transport)?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        return Ok(FetchOutcome::NotModified);
    }
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let raw = read_limited(response, max_bytes).await?;
    Ok(FetchOutcome::Fetched(raw))
}

/// Read a response body with the default size cap, capturing validators.
/// Entry point for fetch overrides, which handle the request themselves.
pub(crate) async fn read_response(response: reqwest::Response) -> Result<RawResponse, FetchError> {
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }
    read_limited(response, DEFAULT_MAX_RESPONSE_BYTES).await
}

async fn read_limited(
    response: reqwest::Response,
    limit: usize,
) -> Result<RawResponse, FetchError> {
    let etag = header_string(&response, reqwest::header::ETAG);
    let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);
    let charset = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(charset_of);

    let expected_length = response.content_length();
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Transport)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // A body shorter than Content-Length means the connection died
    // mid-transfer; surface it so the cycle fails rather than parsing a
    // truncated document.
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }

    if bytes.is_empty() {
        return Err(FetchError::Empty);
    }

    Ok(RawResponse {
        bytes,
        etag,
        last_modified,
        charset,
    })
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_owned())
}

/// Extract the charset parameter from a Content-Type value.
fn charset_of(content_type: &str) -> Option<String> {
    let lowered = content_type.to_lowercase();
    let start = lowered.find("charset=")? + "charset=".len();
    let rest = &lowered[start..];
    let end = rest.find(';').unwrap_or(rest.len());
    let value = rest[..end].trim().trim_matches('"');
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn open_policy() -> HostPolicy {
        HostPolicy::from_config(&Config::default()).unwrap()
    }

    fn policy_with_blacklist(entry: &str) -> HostPolicy {
        let mut config = Config::default();
        config.blacklist = vec![entry.to_string()];
        HostPolicy::from_config(&config).unwrap()
    }

    async fn fetch_url(url: &str, policy: &HostPolicy) -> Result<FetchOutcome, FetchError> {
        let client = reqwest::Client::new();
        let target = FetchTarget::probe(url);
        fetch(
            &client,
            policy,
            &target,
            Duration::from_secs(5),
            DEFAULT_MAX_RESPONSE_BYTES,
        )
        .await
    }

    #[test]
    fn test_charset_of() {
        assert_eq!(
            charset_of("text/xml; charset=ISO-8859-1").as_deref(),
            Some("iso-8859-1")
        );
        assert_eq!(
            charset_of("application/rss+xml; charset=\"UTF-8\"; boundary=x").as_deref(),
            Some("utf-8")
        );
        assert_eq!(charset_of("text/xml"), None);
    }

    #[tokio::test]
    async fn test_fetch_captures_validators_and_charset() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(VALID_RSS.as_bytes().to_vec(), "application/xml; charset=utf-8")
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Mon, 01 Jan 2024 00:00:00 GMT"),
            )
            .mount(&mock_server)
            .await;

        let outcome = fetch_url(&format!("{}/feed", mock_server.uri()), &open_policy())
            .await
            .unwrap();
        let FetchOutcome::Fetched(raw) = outcome else {
            panic!("expected fetched body");
        };
        assert_eq!(raw.etag.as_deref(), Some("\"v1\""));
        assert_eq!(
            raw.last_modified.as_deref(),
            Some("Mon, 01 Jan 2024 00:00:00 GMT")
        );
        assert_eq!(raw.charset.as_deref(), Some("utf-8"));
        assert!(!raw.bytes.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_sends_stored_etag() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("If-None-Match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let target = FetchTarget {
            fetch_url: &url,
            site_url: None,
            etag: Some("\"v1\""),
            last_modified: None,
        };
        let outcome = fetch(
            &client,
            &open_policy(),
            &target,
            Duration::from_secs(5),
            DEFAULT_MAX_RESPONSE_BYTES,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, FetchOutcome::NotModified));
    }

    #[tokio::test]
    async fn test_fetch_404() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let result = fetch_url(&format!("{}/feed", mock_server.uri()), &open_policy()).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_fetch_empty_body_is_failure() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(""))
            .mount(&mock_server)
            .await;

        let result = fetch_url(&format!("{}/feed", mock_server.uri()), &open_policy()).await;
        assert!(matches!(result, Err(FetchError::Empty)));
    }

    #[tokio::test]
    async fn test_fetch_too_large() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
            .mount(&mock_server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/feed", mock_server.uri());
        let target = FetchTarget::probe(&url);
        let result = fetch(
            &client,
            &open_policy(),
            &target,
            Duration::from_secs(5),
            1024,
        )
        .await;
        assert!(matches!(result, Err(FetchError::TooLarge)));
    }

    #[tokio::test]
    async fn test_blacklisted_host_fails_before_io() {
        let mock_server = MockServer::start().await;
        // The server must never be contacted
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(0)
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let policy = policy_with_blacklist("127.0.0.1");
        let result = fetch_url(&url, &policy).await;
        assert!(matches!(result, Err(FetchError::HostBlacklisted)));
    }
}
