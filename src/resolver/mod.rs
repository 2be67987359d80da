//! Metadata lookup for identifier URIs.
//!
//! The [`Resolver`] turns a URI into a request against the authority that
//! minted it and drives that request to a validated response.
//!
//! # Algorithm
//!
//! 1. Pick the first rule that matches and has a resolve template
//! 2. Build the target URL from the template
//! 3. Send `HEAD` (resolve) or `GET` (fetch) with `Accept: <format>`
//! 4. Follow `3xx` + `Location` hops, joining relative locations
//! 5. A `HEAD` that errors or returns `>= 400` is re-sent once as `GET`;
//!    this is free with respect to the retry budget
//! 6. Steps 3-5 form one attempt; transient outcomes re-run the attempt
//!    under the [`RetryPolicy`]
//! 7. Check the content type against the rule format
//! 8. `fetch` only: parse the body and find the subject, falling back to the
//!    canonical form of the final URL
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uri_normalizer_core::resolver::Resolver;
//! use uri_normalizer_core::rules::{RuleSet, RuleSpec};
//! use uri_normalizer_core::transport::ReqwestTransport;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let rules = RuleSet::from_specs([RuleSpec::new(
//!     r"^https?://([^.]*[.])?geonames[.]org/([0-9]+)(/.*)?$",
//!     r"https://www.geonames.org/\2",
//! )
//! .with_resolve(r"https://sws.geonames.org/\2/about.rdf", "application/rdf+xml")])?;
//!
//! let resolver = Resolver::new(Arc::new(rules), Arc::new(ReqwestTransport::new()?));
//! let resolved = resolver.resolve("https://www.geonames.org/276136").await?;
//! println!("{} via {}", resolved.final_url, resolved.method);
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::ResolveError;

use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::metadata::{MetadataParser, NTriplesParser};
use crate::outcome::{FetchedMetadata, ResolvedRequest};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::rules::{NormalizationRule, RuleSet};
use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Default limit on redirect hops within one attempt.
pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// The final response of a successful attempt sequence.
#[derive(Debug)]
struct Exchange {
    final_url: Url,
    method: Method,
    response: HttpResponse,
}

/// Why one attempt (request + redirects + downgrade) did not yield a response.
enum AttemptError {
    Transport { url: Url, error: TransportError },
    Fatal(ResolveError),
}

/// Resolves URIs to validated metadata responses.
pub struct Resolver {
    rules: Arc<RuleSet>,
    transport: Arc<dyn Transport>,
    parser: Arc<dyn MetadataParser>,
    retry: RetryPolicy,
    max_redirects: usize,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("rules", &self.rules.len())
            .field("retry", &self.retry)
            .field("max_redirects", &self.max_redirects)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    /// Creates a resolver with the N-Triples parser, no retries and the
    /// default redirect limit.
    #[must_use]
    pub fn new(rules: Arc<RuleSet>, transport: Arc<dyn Transport>) -> Self {
        Self {
            rules,
            transport,
            parser: Arc::new(NTriplesParser::new()),
            retry: RetryPolicy::default(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn MetadataParser>) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Resolves `uri` with a `HEAD` lookup and validates the response.
    ///
    /// # Errors
    ///
    /// `NoRuleMatch`, `MalformedRule`, `TransportFailure`,
    /// `NonRetryableStatus`, `ContentTypeMismatch`, `TooManyRedirects` or
    /// `InvalidUrl`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, uri: &str) -> Result<ResolvedRequest, ResolveError> {
        let (rule, target) = self.rules.resolvable(uri)?;
        let exchange = self.execute(rule, &target, Method::HEAD).await?;

        info!(
            uri,
            final_url = %exchange.final_url,
            method = %exchange.method,
            "Resolution successful"
        );
        Ok(ResolvedRequest {
            uri: uri.to_string(),
            final_url: exchange.final_url.to_string(),
            method: exchange.method.to_string(),
            status: exchange.response.status,
            format: rule.format().to_string(),
        })
    }

    /// Fetches and parses metadata about `uri`.
    ///
    /// # Errors
    ///
    /// Everything [`Resolver::resolve`] raises, plus `Parse` and
    /// `NoMatchingSubject`.
    #[instrument(skip(self))]
    pub async fn fetch(&self, uri: &str) -> Result<FetchedMetadata, ResolveError> {
        let (rule, target) = self.rules.resolvable(uri)?;
        let exchange = self.execute(rule, &target, Method::GET).await?;
        let final_url = exchange.final_url.to_string();
        let format = if rule.format().is_empty() {
            exchange.response.media_type()
        } else {
            rule.format().to_string()
        };

        let graph = self
            .parser
            .parse(&exchange.response.body, &format)
            .map_err(|source| ResolveError::Parse {
                url: final_url.clone(),
                source,
            })?;

        let subject = if self.parser.subject_has_statements(&graph, uri) {
            uri.to_string()
        } else if rule.alternate_subject() {
            let alternate = rule
                .canonicalize(&final_url)?
                .unwrap_or_else(|| final_url.clone());
            debug!(uri, alternate = %alternate, "Subject not found; trying canonical final URL");
            if !self.parser.subject_has_statements(&graph, &alternate) {
                return Err(ResolveError::no_matching_subject(uri, &final_url));
            }
            alternate
        } else {
            return Err(ResolveError::no_matching_subject(uri, &final_url));
        };

        info!(uri, subject = %subject, triples = graph.len(), "Metadata fetched");
        Ok(FetchedMetadata {
            uri: uri.to_string(),
            subject,
            final_url,
            format,
            graph,
        })
    }

    /// Runs attempts until success, a fatal status or an exhausted budget,
    /// then validates the content type.
    async fn execute(
        &self,
        rule: &NormalizationRule,
        target: &str,
        initial: Method,
    ) -> Result<Exchange, ResolveError> {
        let start = Url::parse(target).map_err(|e| ResolveError::invalid_url(target, e))?;
        let mut method = initial;
        let mut attempt: u32 = 0;

        loop {
            let outcome = self.attempt(rule, &start, &mut method).await;
            attempt += 1;

            match outcome {
                Ok((final_url, response)) => {
                    match self.retry.decide_status(response.status, attempt) {
                        RetryDecision::Accept => {
                            check_content_type(rule, &final_url, &response)?;
                            return Ok(Exchange {
                                final_url,
                                method,
                                response,
                            });
                        }
                        RetryDecision::Retry { delay, attempt } => {
                            warn!(
                                url = %final_url,
                                status = response.status,
                                attempt,
                                delay_ms = delay.as_millis(),
                                "Transient status; retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            return Err(ResolveError::non_retryable_status(
                                final_url.as_str(),
                                response.status,
                                attempt,
                            ));
                        }
                    }
                }
                Err(AttemptError::Transport { url, error }) => {
                    match self.retry.decide_transport_error(attempt) {
                        RetryDecision::Retry { delay, attempt } => {
                            warn!(
                                url = %url,
                                error = %error,
                                attempt,
                                delay_ms = delay.as_millis(),
                                "Transport error; retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        RetryDecision::Accept | RetryDecision::GiveUp => {
                            return Err(ResolveError::transport_failure(
                                url.as_str(),
                                &error.message,
                                attempt,
                            ));
                        }
                    }
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
            }
        }
    }

    /// One attempt: send, follow redirects, downgrade a rejected `HEAD`.
    async fn attempt(
        &self,
        rule: &NormalizationRule,
        start: &Url,
        method: &mut Method,
    ) -> Result<(Url, HttpResponse), AttemptError> {
        let mut url = start.clone();
        let mut hops: usize = 0;

        loop {
            let response = self
                .send_with_downgrade(rule, &url, method)
                .await
                .map_err(|error| AttemptError::Transport {
                    url: url.clone(),
                    error,
                })?;

            let location = match response.location() {
                Some(location) if response.is_redirect() => location,
                _ => return Ok((url, response)),
            };

            hops += 1;
            if hops > self.max_redirects {
                return Err(AttemptError::Fatal(ResolveError::too_many_redirects(
                    start.as_str(),
                    hops - 1,
                )));
            }
            let next = url
                .join(location)
                .map_err(|e| AttemptError::Fatal(ResolveError::invalid_url(location, e)))?;
            debug!(from = %url, to = %next, status = response.status, "Following redirect");
            url = next;
        }
    }

    async fn send_with_downgrade(
        &self,
        rule: &NormalizationRule,
        url: &Url,
        method: &mut Method,
    ) -> Result<HttpResponse, TransportError> {
        let result = self.transport.send(build_request(method.clone(), url, rule)).await;
        if *method != Method::HEAD || !rule.head_fallback() {
            return result;
        }

        let rejected = match &result {
            Err(_) => true,
            Ok(response) => response.status >= 400,
        };
        if !rejected {
            return result;
        }

        warn!(
            url = %url,
            status = ?result.as_ref().map(|r| r.status).ok(),
            "HEAD rejected; re-sending as GET"
        );
        *method = Method::GET;
        self.transport.send(build_request(Method::GET, url, rule)).await
    }
}

fn build_request(method: Method, url: &Url, rule: &NormalizationRule) -> HttpRequest {
    let request = HttpRequest::new(method, url.clone());
    if rule.format().is_empty() {
        request
    } else {
        request.with_accept(rule.format())
    }
}

/// Rules without a format accept any representation.
fn check_content_type(
    rule: &NormalizationRule,
    url: &Url,
    response: &HttpResponse,
) -> Result<(), ResolveError> {
    if rule.format().is_empty() {
        return Ok(());
    }
    let actual = response.media_type();
    if actual == rule.format() {
        return Ok(());
    }
    Err(ResolveError::content_type_mismatch(
        url.as_str(),
        rule.format(),
        &actual,
    ))
}
