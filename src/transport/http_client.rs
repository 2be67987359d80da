//! `reqwest`-backed [`Transport`].
//!
//! Centralizes networking defaults: timeouts, user-agent, compression and
//! proxy compatibility. Redirects are disabled because the resolver follows
//! them itself.

use std::error::Error as _;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use tracing::{debug, instrument, warn};

use super::{HttpRequest, HttpResponse, Transport, TransportError};

/// Default connect timeout in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default per-request timeout in seconds.
pub const READ_TIMEOUT_SECS: u64 = 30;

/// User-agent sent with every lookup.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("uri-normalizer/{version} (identifier-metadata-resolver)")
}

/// Production transport over a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a transport with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when client construction fails.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Builds a transport with custom timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when client construction fails.
    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, TransportError> {
        match try_build_client(connect, read, false) {
            Ok(client) => Ok(Self { client }),
            Err(BuildClientFailure::Panic) => {
                // Some sandboxed environments panic when querying system proxy
                // settings; env proxies still apply on the fallback builder.
                warn!("HTTP client hit system proxy panic; using env-proxy fallback builder");
                match try_build_client(connect, read, true) {
                    Ok(client) => Ok(Self { client }),
                    Err(BuildClientFailure::Panic) => Err(TransportError::new(
                        "",
                        "HTTP client construction panicked",
                    )),
                    Err(BuildClientFailure::Build(error)) => Err(TransportError::new(
                        "",
                        format!("HTTP client construction failed: {error}"),
                    )),
                }
            }
            Err(BuildClientFailure::Build(error)) => Err(TransportError::new(
                "",
                format!("HTTP client construction failed: {error}"),
            )),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = request.url.to_string();
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .send()
            .await
            .map_err(|e| TransportError::new(&url, error_chain_message(&e)))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::new(&url, error_chain_message(&e)))?;

        debug!(status, bytes = body.len(), "Response received");
        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Joins an error with its sources so messages keep the root cause
/// ("connection refused", "dns error", ...).
fn error_chain_message(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    connect: Duration,
    read: Duration,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(connect, read);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(connect: Duration, read: Duration) -> ClientBuilder {
    Client::builder()
        .connect_timeout(connect)
        .timeout(read)
        .user_agent(default_user_agent())
        .redirect(Policy::none())
        .gzip(true)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = find_first_proxy_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = find_first_proxy_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn find_first_proxy_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}
