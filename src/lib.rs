//! URI Normalizer Core Library
//!
//! Canonicalizes identifier URIs (GeoNames, VIAF, GND, ORCID, Wikidata, ...)
//! against an ordered rule table and fetches machine-readable metadata from
//! the authority that minted them.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`rules`] - Rule records, compiled rules and the ordered rule table
//! - [`retry`] - Retry budget and backoff decisions
//! - [`transport`] - One-request HTTP capability and its reqwest implementation
//! - [`metadata`] - Metadata graphs and the parser seam
//! - [`resolver`] - Redirects, `HEAD`→`GET` downgrade, retries and validation
//! - [`cache`] - In-process and SQLite result caches
//! - [`db`] - SQLite connection and schema management
//! - [`normalizer`] - The cached [`UriNormalizer`] facade
//! - [`config`] - TOML configuration and rule table files

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod db;
pub mod metadata;
pub mod normalizer;
pub mod outcome;
pub mod resolver;
pub mod retry;
pub mod rules;
pub mod transport;

// Re-export commonly used types
pub use cache::{CacheBackend, CacheError, CacheKey, MemoryCache, ResultCache, SqliteCache};
pub use config::{ConfigError, NormalizerConfig};
pub use db::{Database, DbError};
pub use metadata::{MetadataGraph, MetadataParser, NTriplesParser, ParseError, Triple};
pub use normalizer::{MetadataRecord, NormalizerError, UriNormalizer, UriNormalizerBuilder};
pub use outcome::{FetchedMetadata, ResolutionOutcome, ResolvedRequest};
pub use resolver::{ResolveError, Resolver};
pub use retry::{BackoffScale, RetryDecision, RetryPolicy};
pub use rules::{NormalizationRule, RuleError, RuleSet, RuleSpec};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
