//! The "send one request, get one response" capability the resolver runs on.
//!
//! The resolver never talks to an HTTP library directly. It builds an
//! [`HttpRequest`], hands it to a [`Transport`] and inspects the
//! [`HttpResponse`] or [`TransportError`] that comes back. Redirects, retries
//! and method downgrades are decided by the resolver, so transports must not
//! follow redirects on their own.
//!
//! [`ReqwestTransport`] is the production implementation; tests plug in
//! scripted transports.

mod http_client;

pub use http_client::{
    CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, ReqwestTransport, default_user_agent,
};

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, LOCATION};
use thiserror::Error;
use url::Url;

/// Transport-level failure: DNS, connection, TLS, timeout, body read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    /// The URL the request was sent to.
    pub url: String,
    /// Human-readable failure text, including the source chain.
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// One outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Sets the `Accept` header. Values that are not valid header text are
    /// left out.
    #[must_use]
    pub fn with_accept(mut self, media_type: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(media_type) {
            self.headers.insert(ACCEPT, value);
        }
        self
    }

    /// The `Accept` header value, if set.
    #[must_use]
    pub fn accept(&self) -> Option<&str> {
        self.headers.get(ACCEPT).and_then(|v| v.to_str().ok())
    }
}

/// One received response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Adds a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// The `Location` header, if present and non-empty.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// The media type of the `Content-Type` header with parameters removed.
    ///
    /// Returns an empty string when the header is missing.
    #[must_use]
    pub fn media_type(&self) -> String {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }
}

/// Sends exactly one HTTP request.
///
/// # Object Safety
///
/// Uses `async_trait` so the resolver can hold an `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` without following redirects.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_strips_parameters() {
        let resp = HttpResponse::new(200).with_header("Content-Type", "text/turtle; charset=utf-8");
        assert_eq!(resp.media_type(), "text/turtle");
    }

    #[test]
    fn test_media_type_missing_is_empty() {
        assert_eq!(HttpResponse::new(200).media_type(), "");
    }

    #[test]
    fn test_location_ignores_blank_header() {
        let resp = HttpResponse::new(302).with_header("Location", "   ");
        assert!(resp.location().is_none());
        let resp = HttpResponse::new(302).with_header("Location", "/next");
        assert_eq!(resp.location(), Some("/next"));
    }

    #[test]
    fn test_redirect_range() {
        assert!(HttpResponse::new(301).is_redirect());
        assert!(HttpResponse::new(399).is_redirect());
        assert!(!HttpResponse::new(400).is_redirect());
        assert!(!HttpResponse::new(200).is_redirect());
    }

    #[test]
    fn test_request_accept_header() {
        let url = Url::parse("https://example.org/a").unwrap();
        let request = HttpRequest::new(Method::GET, url).with_accept("application/n-triples");
        assert_eq!(request.accept(), Some("application/n-triples"));
    }

    #[test]
    fn test_transport_error_display_is_message() {
        let err = TransportError::new("http://foo/bar", "connection refused");
        assert_eq!(err.to_string(), "connection refused");
    }
}
