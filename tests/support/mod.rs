//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;

use uri_normalizer_core::{
    ReqwestTransport, Resolver, RetryPolicy, RuleSet, RuleSpec, UriNormalizer,
};
use wiremock::MockServer;

pub const NTRIPLES: &str = "application/n-triples";

/// One rule whose metadata lives on the mock server:
/// `https://id.test/<n>` resolves to `<mock>/meta/<n>.nt`.
pub fn mock_rules(server: &MockServer) -> RuleSet {
    RuleSet::from_specs([RuleSpec::new(
        r"^https?://(www[.])?id[.]test/([0-9]+)(/.*)?$",
        r"https://id.test/\2",
    )
    .with_resolve(format!(r"{}/meta/\2.nt", server.uri()), NTRIPLES)])
    .unwrap()
}

/// A rule whose canonical form is the mock server URL itself, so redirect
/// targets on the server normalize to identifiers.
pub fn server_canonical_rules(server: &MockServer) -> RuleSet {
    let base = regex::escape(&server.uri());
    RuleSet::from_specs([RuleSpec::new(
        format!(r"^(https?://id[.]test|{base}/(alias|meta))/([0-9]+)([./].*)?$"),
        r"https://id.test/\3",
    )
    .with_resolve(format!(r"{}/meta/\3.nt", server.uri()), NTRIPLES)])
    .unwrap()
}

pub fn transport() -> Arc<ReqwestTransport> {
    Arc::new(ReqwestTransport::new().unwrap())
}

pub fn resolver(rules: RuleSet, retry: RetryPolicy) -> Resolver {
    Resolver::new(Arc::new(rules), transport()).with_retry_policy(retry)
}

pub fn normalizer(rules: RuleSet) -> UriNormalizer {
    UriNormalizer::builder()
        .rules(rules)
        .transport(transport())
        .build()
        .unwrap()
}

/// An N-Triples document with one statement about `subject`.
pub fn about(subject: &str) -> String {
    format!("<{subject}> <http://schema.org/name> \"Test entity\" .\n")
}
