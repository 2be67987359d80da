//! The `UriNormalizer` facade: rules, resolver and result cache in one handle.
//!
//! Every operation looks up its operation-prefixed cache key first and only
//! falls through to the rule table or the network on a miss. Successful
//! outcomes are stored under the input URI and its aliases (canonical input,
//! canonical final URL, and for `fetch` the matched subject), so any of those
//! spellings hits the cache on the next call.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cache::{CacheBackend, CacheError, CacheKey, CachedValue, ResultCache};
use crate::metadata::MetadataParser;
use crate::outcome::{FetchedMetadata, ResolutionOutcome, ResolvedRequest};
use crate::resolver::{DEFAULT_MAX_REDIRECTS, ResolveError, Resolver};
use crate::retry::RetryPolicy;
use crate::rules::{RuleError, RuleSet};
use crate::transport::{ReqwestTransport, Transport, TransportError};

/// Errors raised by the facade.
#[derive(Debug, Error)]
pub enum NormalizerError {
    /// Rule matching, HTTP lookup or metadata validation failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A cache tier failed.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// `normalize_meta` was called without a property and no default is set.
    #[error("id property not defined")]
    MissingIdProperty,
}

impl From<RuleError> for NormalizerError {
    fn from(error: RuleError) -> Self {
        Self::Resolve(error.into())
    }
}

/// Identifier values of a metadata resource, grouped by property.
///
/// Values of one property keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord {
    properties: BTreeMap<String, Vec<String>>,
}

impl MetadataRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to `property`.
    pub fn add(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.properties
            .entry(property.into())
            .or_default()
            .push(value.into());
    }

    #[must_use]
    pub fn with_value(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(property, value);
        self
    }

    /// Values of `property`, empty when absent.
    #[must_use]
    pub fn values(&self, property: &str) -> &[String] {
        self.properties.get(property).map_or(&[], Vec::as_slice)
    }

    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    fn values_mut(&mut self, property: &str) -> Option<&mut Vec<String>> {
        self.properties.get_mut(property)
    }
}

/// Builder for [`UriNormalizer`].
#[derive(Default)]
pub struct UriNormalizerBuilder {
    rules: RuleSet,
    transport: Option<Arc<dyn Transport>>,
    parser: Option<Arc<dyn MetadataParser>>,
    retry: RetryPolicy,
    cache: Option<ResultCache>,
    id_property: Option<String>,
    max_redirects: Option<usize>,
}

impl UriNormalizerBuilder {
    #[must_use]
    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn parser(mut self, parser: Arc<dyn MetadataParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Uses `cache` instead of a fresh in-memory cache.
    #[must_use]
    pub fn cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Default property for [`UriNormalizer::normalize_meta`].
    #[must_use]
    pub fn id_property(mut self, property: impl Into<String>) -> Self {
        let property = property.into();
        self.id_property = (!property.is_empty()).then_some(property);
        self
    }

    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    /// Builds the facade, creating a [`ReqwestTransport`] when none was given.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the default HTTP client cannot be
    /// built.
    pub fn build(self) -> Result<UriNormalizer, TransportError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let rules = Arc::new(self.rules);

        let mut resolver = Resolver::new(Arc::clone(&rules), transport)
            .with_retry_policy(self.retry)
            .with_max_redirects(self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS));
        if let Some(parser) = self.parser {
            resolver = resolver.with_parser(parser);
        }

        Ok(UriNormalizer {
            rules,
            resolver,
            cache: self.cache.unwrap_or_default(),
            id_property: self.id_property,
        })
    }
}

/// Canonicalizes identifier URIs and fetches their metadata, with caching.
///
/// # Example
///
/// ```no_run
/// use uri_normalizer_core::{RuleSet, RuleSpec, UriNormalizer};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let rules = RuleSet::from_specs([RuleSpec::new(
///     r"^https?://orcid[.]org/([0-9]{4}-[0-9]{4}-[0-9]{4}-[0-9]{3}[0-9X])$",
///     r"https://orcid.org/\1",
/// )])?;
/// let normalizer = UriNormalizer::builder().rules(rules).build()?;
///
/// let canonical = normalizer.normalize("http://orcid.org/0000-0001-5000-0007", true).await?;
/// assert_eq!(canonical, "https://orcid.org/0000-0001-5000-0007");
/// # Ok(())
/// # }
/// ```
pub struct UriNormalizer {
    rules: Arc<RuleSet>,
    resolver: Resolver,
    cache: ResultCache,
    id_property: Option<String>,
}

impl std::fmt::Debug for UriNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UriNormalizer")
            .field("resolver", &self.resolver)
            .field("cache", &self.cache)
            .field("id_property", &self.id_property)
            .finish_non_exhaustive()
    }
}

impl UriNormalizer {
    #[must_use]
    pub fn builder() -> UriNormalizerBuilder {
        UriNormalizerBuilder::default()
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    #[must_use]
    pub fn id_property(&self) -> Option<&str> {
        self.id_property.as_deref()
    }

    /// Closes the cache tiers. Call once before shutdown so the durable
    /// tier is flushed to disk.
    pub async fn close(&self) {
        self.cache.close().await;
    }

    /// Returns the canonical form of `uri`.
    ///
    /// Pass-through results for unmatched input are not cached.
    ///
    /// # Errors
    ///
    /// `NoRuleMatch` when `require_match` is set and no rule matches,
    /// `MalformedRule`, or a cache failure.
    #[instrument(skip(self))]
    pub async fn normalize(&self, uri: &str, require_match: bool) -> Result<String, NormalizerError> {
        let key = CacheKey::Normalize.key(uri);
        if let Some(hit) = self.cache.get(&key).await?
            && let Some(canonical) = hit.as_normalized()
        {
            debug!(uri, "Cache hit");
            return Ok(canonical.to_string());
        }

        let canonical = match self.rules.normalize(uri, true) {
            Ok(canonical) => canonical,
            Err(RuleError::NoMatch { .. }) if !require_match => return Ok(uri.to_string()),
            Err(e) => return Err(e.into()),
        };

        let keys = [key, CacheKey::Normalize.key(&canonical)];
        let value = Arc::new(ResolutionOutcome::Normalized(canonical.clone()));
        self.cache.store_aliases(&keys, value).await?;
        Ok(canonical)
    }

    /// Resolves `uri` to a validated metadata request.
    ///
    /// Any spelling that normalizes to a cached identifier is served from
    /// the cache; the returned `uri` is then the one first resolved.
    ///
    /// # Errors
    ///
    /// Any [`ResolveError`] from the resolver, or a cache failure.
    #[instrument(skip(self))]
    pub async fn resolve(&self, uri: &str) -> Result<ResolvedRequest, NormalizerError> {
        if let Some(hit) = self.cached(CacheKey::Resolve, uri).await?
            && let Some(resolved) = hit.as_resolved()
        {
            return Ok(resolved.clone());
        }

        let resolved = self.resolver.resolve(uri).await?;
        let keys = self.alias_keys(CacheKey::Resolve, uri, &resolved.final_url, None);
        self.cache
            .store_aliases(&keys, Arc::new(ResolutionOutcome::Resolved(resolved.clone())))
            .await?;
        Ok(resolved)
    }

    /// Fetches and parses metadata about `uri`.
    ///
    /// Cache hits through an alias behave as for [`UriNormalizer::resolve`].
    ///
    /// # Errors
    ///
    /// Any [`ResolveError`] from the resolver, or a cache failure.
    #[instrument(skip(self))]
    pub async fn fetch(&self, uri: &str) -> Result<FetchedMetadata, NormalizerError> {
        if let Some(hit) = self.cached(CacheKey::Fetch, uri).await?
            && let Some(fetched) = hit.as_fetched()
        {
            return Ok(fetched.clone());
        }

        let fetched = self.resolver.fetch(uri).await?;
        let keys = self.alias_keys(
            CacheKey::Fetch,
            uri,
            &fetched.final_url,
            Some(&fetched.subject),
        );
        self.cache
            .store_aliases(&keys, Arc::new(ResolutionOutcome::Fetched(fetched.clone())))
            .await?;
        Ok(fetched)
    }

    /// Returns a copy of `record` with every value of the id property
    /// normalized.
    ///
    /// `property` falls back to the configured default. Values that normalize
    /// to the same URI are merged. On error `record` is left untouched.
    ///
    /// # Errors
    ///
    /// [`NormalizerError::MissingIdProperty`] when no property is known, or
    /// the first error raised by [`UriNormalizer::normalize`].
    pub async fn normalize_meta(
        &self,
        record: &MetadataRecord,
        property: Option<&str>,
        require_match: bool,
    ) -> Result<MetadataRecord, NormalizerError> {
        let mut copy = record.clone();
        self.normalize_meta_in_place(&mut copy, property, require_match)
            .await?;
        Ok(copy)
    }

    /// Normalizes the id property values of `record` in place.
    ///
    /// Not transactional: when a value fails, the values before it are
    /// already replaced and the rest keep their original form.
    ///
    /// # Errors
    ///
    /// Same as [`UriNormalizer::normalize_meta`].
    #[instrument(skip(self, record))]
    pub async fn normalize_meta_in_place(
        &self,
        record: &mut MetadataRecord,
        property: Option<&str>,
        require_match: bool,
    ) -> Result<(), NormalizerError> {
        let property = property
            .filter(|p| !p.is_empty())
            .or(self.id_property.as_deref())
            .ok_or(NormalizerError::MissingIdProperty)?
            .to_string();

        let Some(values) = record.values_mut(&property) else {
            return Ok(());
        };
        for value in values.iter_mut() {
            *value = self.normalize(value, require_match).await?;
        }

        let mut seen = Vec::with_capacity(values.len());
        values.retain(|v| {
            if seen.contains(v) {
                false
            } else {
                seen.push(v.clone());
                true
            }
        });
        debug!(property = %property, values = values.len(), "Normalized id property");
        Ok(())
    }

    /// Looks `uri` up under its own key, then under its canonical form.
    ///
    /// A hit through the canonical form returns the outcome as stored, so its
    /// `uri` field names the input of the call that populated the cache, not
    /// the spelling passed here.
    async fn cached(&self, op: CacheKey, uri: &str) -> Result<Option<CachedValue>, CacheError> {
        if let Some(hit) = self.cache.get(&op.key(uri)).await? {
            debug!(uri, prefix = op.prefix(), "Cache hit");
            return Ok(Some(hit));
        }
        let Some(canonical) = self.cache_alias(uri).filter(|c| c != uri) else {
            return Ok(None);
        };
        let hit = self.cache.get(&op.key(&canonical)).await?;
        if hit.is_some() {
            debug!(uri, canonical = %canonical, prefix = op.prefix(), "Cache hit via canonical form");
        }
        Ok(hit)
    }

    /// Keys an outcome is stored under: the input, the canonical input, the
    /// canonical final URL and the subject, when they exist.
    fn alias_keys(
        &self,
        op: CacheKey,
        uri: &str,
        final_url: &str,
        subject: Option<&str>,
    ) -> Vec<String> {
        let mut aliases = vec![uri.to_string()];
        aliases.extend(self.cache_alias(uri));
        aliases.extend(self.cache_alias(final_url));
        aliases.extend(subject.map(str::to_string));
        aliases.iter().map(|alias| op.key(alias)).collect()
    }

    /// Canonical form of `uri` for cache keys. A rule that fails on `uri`
    /// only costs the alias; the failure is logged and the lookup goes on.
    fn cache_alias(&self, uri: &str) -> Option<String> {
        match self.rules.normalize(uri, true) {
            Ok(canonical) => Some(canonical),
            Err(RuleError::NoMatch { .. }) => None,
            Err(error) => {
                warn!(uri, error = %error, "Skipping cache alias for malformed rule output");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::{DEFAULT_TTL, SqliteCache};
    use crate::db::Database;
    use crate::rules::RuleSpec;
    use crate::transport::{HttpRequest, HttpResponse};

    const ID: &str = "https://vocabs.example/hasIdentifier";

    /// Answers every request with the same N-Triples body and counts calls.
    struct StaticTransport {
        calls: AtomicUsize,
        body: String,
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse::new(200)
                .with_header("Content-Type", "application/n-triples")
                .with_body(self.body.clone()))
        }
    }

    fn rules() -> RuleSet {
        RuleSet::from_specs([RuleSpec::new(
            r"^https?://([^.]*[.])?geonames[.]org/([0-9]+)(/.*)?$",
            r"https://www.geonames.org/\2",
        )
        .with_resolve(r"https://sws.geonames.org/\2/about.nt", "application/n-triples")])
        .unwrap()
    }

    fn normalizer(transport: Arc<StaticTransport>) -> UriNormalizer {
        UriNormalizer::builder()
            .rules(rules())
            .transport(transport)
            .id_property(ID)
            .build()
            .unwrap()
    }

    fn transport() -> Arc<StaticTransport> {
        Arc::new(StaticTransport {
            calls: AtomicUsize::new(0),
            body: "<https://www.geonames.org/276136> <http://schema.org/name> \"Lebanon\" .".into(),
        })
    }

    #[tokio::test]
    async fn test_normalize_caches_input_and_canonical() {
        let n = normalizer(transport());
        let canonical = n
            .normalize("http://geonames.org/276136/lebanon.html", true)
            .await
            .unwrap();
        assert_eq!(canonical, "https://www.geonames.org/276136");
        assert!(n.cache().has("n:http://geonames.org/276136/lebanon.html").await.unwrap());
        assert!(n.cache().has("n:https://www.geonames.org/276136").await.unwrap());
    }

    #[tokio::test]
    async fn test_normalize_passthrough_is_not_cached() {
        let n = normalizer(transport());
        let out = n.normalize("https://unknown.test/1", false).await.unwrap();
        assert_eq!(out, "https://unknown.test/1");
        assert!(!n.cache().has("n:https://unknown.test/1").await.unwrap());

        let err = n.normalize("https://unknown.test/1", true).await.unwrap_err();
        assert_eq!(err.to_string(), "https://unknown.test/1 doesn't match any rule");
    }

    #[tokio::test]
    async fn test_fetch_is_cached_under_aliases() {
        let t = transport();
        let n = normalizer(Arc::clone(&t));

        let first = n.fetch("https://geonames.org/276136").await.unwrap();
        assert_eq!(first.subject, "https://www.geonames.org/276136");
        let again = n.fetch("https://www.geonames.org/276136").await.unwrap();
        assert_eq!(first, again);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_and_fetch_use_separate_namespaces() {
        let t = transport();
        let n = normalizer(Arc::clone(&t));
        n.resolve("https://www.geonames.org/276136").await.unwrap();
        n.fetch("https://www.geonames.org/276136").await.unwrap();
        assert_eq!(t.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_normalize_meta_returns_new_record() {
        let n = normalizer(transport());
        let record = MetadataRecord::new()
            .with_value(ID, "http://geonames.org/276136")
            .with_value(ID, "https://www.geonames.org/276136/")
            .with_value("https://vocabs.example/title", "http://geonames.org/1");

        let out = n.normalize_meta(&record, None, true).await.unwrap();
        assert_eq!(out.values(ID), ["https://www.geonames.org/276136"]);
        assert_eq!(out.values("https://vocabs.example/title"), ["http://geonames.org/1"]);
        assert_eq!(record.values(ID).len(), 2, "input must be untouched");
    }

    #[tokio::test]
    async fn test_normalize_meta_in_place_is_not_transactional() {
        let n = normalizer(transport());
        let mut record = MetadataRecord::new()
            .with_value(ID, "http://geonames.org/1")
            .with_value(ID, "https://unknown.test/2")
            .with_value(ID, "http://geonames.org/3");

        let err = n
            .normalize_meta_in_place(&mut record, None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizerError::Resolve(ResolveError::NoRuleMatch { .. })));
        assert_eq!(
            record.values(ID),
            [
                "https://www.geonames.org/1",
                "https://unknown.test/2",
                "http://geonames.org/3"
            ]
        );
    }

    #[tokio::test]
    async fn test_undecodable_durable_entry_is_recomputed() {
        let db = Database::in_memory().await.unwrap();
        sqlx::query("INSERT INTO cache (key, value, expires) VALUES (?, ?, ?)")
            .bind("n:http://geonames.org/1")
            .bind(r#"{"kind":"old_shape"}"#)
            .bind(i64::MAX)
            .execute(db.pool())
            .await
            .unwrap();
        let durable = SqliteCache::from_database(db, DEFAULT_TTL).await.unwrap();
        let n = UriNormalizer::builder()
            .rules(rules())
            .transport(transport())
            .cache(ResultCache::with_durable(durable))
            .build()
            .unwrap();

        let canonical = n.normalize("http://geonames.org/1", true).await.unwrap();
        assert_eq!(canonical, "https://www.geonames.org/1");

        let hit = n.cache().get("n:http://geonames.org/1").await.unwrap().unwrap();
        assert_eq!(hit.as_normalized(), Some("https://www.geonames.org/1"));
    }

    #[tokio::test]
    async fn test_alias_hit_returns_first_resolved_record() {
        let t = transport();
        let n = normalizer(Arc::clone(&t));

        n.resolve("https://www.geonames.org/276136").await.unwrap();
        let via_alias = n
            .resolve("http://geonames.org/276136/lebanon.html")
            .await
            .unwrap();
        assert_eq!(via_alias.uri, "https://www.geonames.org/276136");
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_survives_rule_without_canonical_form() {
        // the replace template yields an empty string for bare ids
        let rules = RuleSet::from_specs([RuleSpec::new(
            r"^https?://geo[.]test/([0-9]+)(/[a-z]+)?$",
            r"\2",
        )
        .with_resolve(r"https://api.geo.test/\1.nt", "application/n-triples")])
        .unwrap();
        let t = transport();
        let n = UriNormalizer::builder()
            .rules(rules)
            .transport(t.clone())
            .build()
            .unwrap();

        assert!(n.normalize("https://geo.test/7", true).await.is_err());
        n.resolve("https://geo.test/7").await.unwrap();
        n.resolve("https://geo.test/7").await.unwrap();
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
        assert!(n.cache().has("r:https://geo.test/7").await.unwrap());
    }

    #[tokio::test]
    async fn test_normalize_meta_missing_property() {
        let n = UriNormalizer::builder()
            .rules(rules())
            .transport(transport())
            .build()
            .unwrap();
        let err = n
            .normalize_meta(&MetadataRecord::new(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, NormalizerError::MissingIdProperty));

        let explicit = n
            .normalize_meta(&MetadataRecord::new().with_value("p", "http://geonames.org/5"), Some("p"), true)
            .await
            .unwrap();
        assert_eq!(explicit.values("p"), ["https://www.geonames.org/5"]);
    }
}
