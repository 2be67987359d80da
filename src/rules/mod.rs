//! Normalization rules and the ordered rule table.
//!
//! A [`NormalizationRule`] maps every URI its pattern matches onto one
//! canonical form and, optionally, onto the URL serving machine-readable
//! metadata for the identified entity. A [`RuleSet`] keeps the rules in table
//! order; the first matching rule wins, so order is part of the contract.
//!
//! # Example
//!
//! ```
//! use uri_normalizer_core::rules::{RuleSet, RuleSpec};
//!
//! let rules = RuleSet::from_specs([RuleSpec::new(
//!     r"^https?://([^.]*[.])?geonames[.]org/([0-9]+)(/.*)?$",
//!     r"https://www.geonames.org/\2",
//! )])
//! .unwrap();
//!
//! let canonical = rules
//!     .normalize("http://aaa.geonames.org/276136/borj-ej-jaaiyat.html", true)
//!     .unwrap();
//! assert_eq!(canonical, "https://www.geonames.org/276136");
//! ```

mod error;
mod template;

pub use error::RuleError;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use template::Template;

fn default_true() -> bool {
    true
}

/// A rule table record as written in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Regular expression matched against candidate URIs.
    #[serde(rename = "match")]
    pub pattern: String,
    /// Template producing the canonical URI.
    pub replace: String,
    /// Template producing the metadata URL; empty opts out of resolution.
    #[serde(default)]
    pub resolve: String,
    /// Expected metadata content type.
    #[serde(default)]
    pub format: String,
    /// Retry a rejected `HEAD` request once as `GET`.
    #[serde(default = "default_true")]
    pub head_fallback: bool,
    /// Look the subject up under the canonical form of the final URL when
    /// the requested URI has no statements.
    #[serde(default = "default_true")]
    pub alternate_subject: bool,
}

impl RuleSpec {
    /// Creates a normalize-only rule record.
    #[must_use]
    pub fn new(pattern: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replace: replace.into(),
            resolve: String::new(),
            format: String::new(),
            head_fallback: true,
            alternate_subject: true,
        }
    }

    /// Adds a resolve template and the expected metadata format.
    #[must_use]
    pub fn with_resolve(mut self, resolve: impl Into<String>, format: impl Into<String>) -> Self {
        self.resolve = resolve.into();
        self.format = format.into();
        self
    }

    /// Enables or disables the `HEAD`→`GET` downgrade.
    #[must_use]
    pub fn with_head_fallback(mut self, enabled: bool) -> Self {
        self.head_fallback = enabled;
        self
    }

    /// Enables or disables the alternate subject lookup.
    #[must_use]
    pub fn with_alternate_subject(mut self, enabled: bool) -> Self {
        self.alternate_subject = enabled;
        self
    }
}

/// A compiled normalization rule.
///
/// Templates are checked against the pattern at construction time, so a rule
/// that exists can only fail at runtime by producing an empty result.
#[derive(Debug, Clone)]
pub struct NormalizationRule {
    pattern: Regex,
    replace: Template,
    resolve: Option<Template>,
    format: String,
    head_fallback: bool,
    alternate_subject: bool,
}

impl NormalizationRule {
    /// Compiles a rule record.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidPattern`] when the pattern does not compile
    /// and [`RuleError::Malformed`] when a template references a capture group
    /// the pattern does not define.
    pub fn new(spec: RuleSpec) -> Result<Self, RuleError> {
        let pattern =
            Regex::new(&spec.pattern).map_err(|e| RuleError::invalid_pattern(&spec.pattern, e))?;

        let replace = Template::parse(&spec.replace);
        check_template(&pattern, &replace, "replace")?;

        let resolve = if spec.resolve.is_empty() {
            None
        } else {
            let resolve = Template::parse(&spec.resolve);
            check_template(&pattern, &resolve, "resolve")?;
            Some(resolve)
        };

        Ok(Self {
            pattern,
            replace,
            resolve,
            format: spec.format,
            head_fallback: spec.head_fallback,
            alternate_subject: spec.alternate_subject,
        })
    }

    /// The rule pattern as written.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Expected metadata content type.
    #[must_use]
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Whether the rule produces a metadata URL.
    #[must_use]
    pub fn is_resolvable(&self) -> bool {
        self.resolve.is_some()
    }

    #[must_use]
    pub fn head_fallback(&self) -> bool {
        self.head_fallback
    }

    #[must_use]
    pub fn alternate_subject(&self) -> bool {
        self.alternate_subject
    }

    #[must_use]
    pub fn is_match(&self, uri: &str) -> bool {
        self.pattern.is_match(uri)
    }

    /// Returns the canonical form of `uri`, or `None` when the rule does not
    /// match it.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Malformed`] when the substitution yields an empty
    /// string.
    pub fn canonicalize(&self, uri: &str) -> Result<Option<String>, RuleError> {
        self.substitute(&self.replace, "replace", uri)
    }

    /// Returns the metadata URL for `uri`, or `None` when the rule does not
    /// match it or has no resolve template.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Malformed`] when the substitution yields an empty
    /// string.
    pub fn resolve_target(&self, uri: &str) -> Result<Option<String>, RuleError> {
        match &self.resolve {
            Some(template) => self.substitute(template, "resolve", uri),
            None => Ok(None),
        }
    }

    fn substitute(
        &self,
        template: &Template,
        field: &'static str,
        uri: &str,
    ) -> Result<Option<String>, RuleError> {
        match template.apply(&self.pattern, uri) {
            Some(out) if out.is_empty() => Err(RuleError::malformed(
                self.pattern(),
                field,
                template.source(),
                "substitution produced an empty value",
            )),
            other => Ok(other),
        }
    }
}

impl TryFrom<RuleSpec> for NormalizationRule {
    type Error = RuleError;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        Self::new(spec)
    }
}

fn check_template(pattern: &Regex, template: &Template, field: &'static str) -> Result<(), RuleError> {
    if field == "replace" && template.is_empty() {
        return Err(RuleError::malformed(
            pattern.as_str(),
            field,
            template.source(),
            "template is empty",
        ));
    }
    template.check_groups(pattern).map_err(|group| {
        RuleError::malformed(
            pattern.as_str(),
            field,
            template.source(),
            &format!("group {group} is not defined by the pattern"),
        )
    })
}

/// An ordered table of normalization rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<NormalizationRule>,
}

impl RuleSet {
    /// Creates a rule set from compiled rules, keeping their order.
    #[must_use]
    pub fn new(rules: Vec<NormalizationRule>) -> Self {
        Self { rules }
    }

    /// Compiles rule records in table order.
    ///
    /// # Errors
    ///
    /// Returns the first [`RuleError`] raised by [`NormalizationRule::new`].
    pub fn from_specs(specs: impl IntoIterator<Item = RuleSpec>) -> Result<Self, RuleError> {
        let rules = specs
            .into_iter()
            .map(NormalizationRule::new)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(rules = rules.len(), "Compiled rule table");
        Ok(Self { rules })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NormalizationRule> {
        self.rules.iter()
    }

    /// Returns the first rule whose pattern matches `uri`.
    #[must_use]
    pub fn find(&self, uri: &str) -> Option<&NormalizationRule> {
        let rule = self.rules.iter().find(|rule| rule.is_match(uri));
        trace!(uri, matched = rule.map(NormalizationRule::pattern), "Rule lookup");
        rule
    }

    /// Returns the canonical form of `uri`.
    ///
    /// When no rule matches, the input is returned unchanged unless
    /// `require_match` is set.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::NoMatch`] when `require_match` is set and nothing
    /// matches, or [`RuleError::Malformed`] when the matched rule produces an
    /// empty value.
    pub fn normalize(&self, uri: &str, require_match: bool) -> Result<String, RuleError> {
        for rule in &self.rules {
            if let Some(canonical) = rule.canonicalize(uri)? {
                debug!(uri, canonical = %canonical, rule = rule.pattern(), "Normalized");
                return Ok(canonical);
            }
        }
        if require_match {
            return Err(RuleError::no_match(uri));
        }
        Ok(uri.to_string())
    }

    /// Returns the first rule that matches `uri` and produces a metadata URL,
    /// together with that URL.
    ///
    /// Rules that match but have no resolve template are skipped, so a later
    /// rule may still resolve the input.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::NoMatch`] when no resolvable rule matches, or
    /// [`RuleError::Malformed`] when the chosen rule produces an empty URL.
    pub fn resolvable(&self, uri: &str) -> Result<(&NormalizationRule, String), RuleError> {
        for rule in &self.rules {
            if let Some(target) = rule.resolve_target(uri)? {
                debug!(uri, target = %target, rule = rule.pattern(), "Resolvable rule found");
                return Ok((rule, target));
            }
        }
        Err(RuleError::no_match(uri))
    }
}

impl FromIterator<NormalizationRule> for RuleSet {
    fn from_iter<T: IntoIterator<Item = NormalizationRule>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn authority_rules() -> RuleSet {
        RuleSet::from_specs([
            RuleSpec::new(
                r"^https?://([^.]*[.])?geonames[.]org/([0-9]+)(/.*)?$",
                r"https://www.geonames.org/\2",
            ),
            RuleSpec::new(
                r"^https?://([^.]*[.])?gazetteer[.]dainst[.]org/([A-Za-z]+/)*([0-9]+)([^0-9].*)?$",
                r"https://gazetteer.dainst.org/place/\3",
            ),
            RuleSpec::new(
                r"^https?://([^.]*[.])?pleiades[.]stoa[.]org/places/([0-9]+)(/.*)?$",
                r"https://www.pleiades.stoa.org/places/\2",
            ),
            RuleSpec::new(
                r"^https?://([^.]*[.])?viaf[.]org/viaf/([0-9]+)(/.*)?$",
                r"https://viaf.org/viaf/\2",
            ),
            RuleSpec::new(
                r"^https?://([^.]*[.])?d-nb[.]info/gnd/([0-9]+-[0-9]+)$",
                r"https://d-nb.info/gnd/\2",
            ),
            RuleSpec::new(
                r"^https?://([^.]*[.])?wikidata[.]org/([A-Za-z:]+/)*(Q[0-9]+)([^0-9].*)?$",
                r"https://www.wikidata.org/entity/\3",
            ),
            RuleSpec::new(
                r"^https?://([^.]*[.])?orcid[.]org/([0-9]{4})-?([0-9]{4})-?([0-9]{4})-?([0-9]{4})$",
                r"https://orcid.org/\2-\3-\4-\5",
            ),
            RuleSpec::new(
                r"^https?://([^.]*[.])?n2t[.]net/ark:/99152/(p0[a-z0-9]+)$",
                r"https://n2t.net/ark:/99152/\2",
            ),
            RuleSpec::new(
                r"^https?://([^.]*[.])?chronontology[.]dainst[.]org/period/([A-Za-z0-9]+)$",
                r"https://chronontology.dainst.org/period/\2",
            ),
        ])
        .unwrap()
    }

    fn assert_all_normalize_to(rules: &RuleSet, inputs: &[&str], expected: &str) {
        for input in inputs {
            assert_eq!(rules.normalize(input, true).unwrap(), expected, "input: {input}");
        }
    }

    #[test]
    fn test_normalize_geonames() {
        assert_all_normalize_to(
            &authority_rules(),
            &["http://aaa.geonames.org/276136/borj-ej-jaaiyat.html"],
            "https://www.geonames.org/276136",
        );
    }

    #[test]
    fn test_normalize_gazetteer() {
        assert_all_normalize_to(
            &authority_rules(),
            &[
                "https://gazetteer.dainst.org/place/2282705",
                "https://gazetteer.dainst.org/doc/2282705.rdf",
                "https://gazetteer.dainst.org/doc/shapefile/2282705",
                "https://gazetteer.dainst.org/doc/2282705",
                "http://aaa.gazetteer.dainst.org/doc/2282705",
            ],
            "https://gazetteer.dainst.org/place/2282705",
        );
    }

    #[test]
    fn test_normalize_pleiades() {
        assert_all_normalize_to(
            &authority_rules(),
            &[
                "https://pleiades.stoa.org/places/658494",
                "http://pleiades.stoa.org/places/658494",
                "http://pleiades.stoa.org/places/658494/carthage",
                "http://aaa.pleiades.stoa.org/places/658494",
            ],
            "https://www.pleiades.stoa.org/places/658494",
        );
    }

    #[test]
    fn test_normalize_viaf() {
        assert_all_normalize_to(
            &authority_rules(),
            &[
                "http://viaf.org/viaf/8110691",
                "https://viaf.org/viaf/8110691",
                "http://viaf.org/viaf/8110691/rdf.xml",
                "http://aaa.viaf.org/viaf/8110691",
            ],
            "https://viaf.org/viaf/8110691",
        );
    }

    #[test]
    fn test_normalize_gnd() {
        assert_all_normalize_to(
            &authority_rules(),
            &[
                "http://d-nb.info/gnd/4491366-7",
                "https://d-nb.info/gnd/4491366-7",
                "http://aaa.d-nb.info/gnd/4491366-7",
            ],
            "https://d-nb.info/gnd/4491366-7",
        );
    }

    #[test]
    fn test_normalize_wikidata() {
        assert_all_normalize_to(
            &authority_rules(),
            &[
                "https://www.wikidata.org/wiki/Q42",
                "http://www.wikidata.org/entity/Q42",
                "http://www.wikidata.org/wiki/Special:EntityData/Q42",
                "http://www.wikidata.org/wiki/Special:EntityData/Q42.json",
                "http://www.wikidata.org/wiki/Special:EntityData/Q42.json?revision=112",
                "http://aaa.wikidata.org/wiki/Q42",
            ],
            "https://www.wikidata.org/entity/Q42",
        );
    }

    #[test]
    fn test_normalize_orcid() {
        assert_all_normalize_to(
            &authority_rules(),
            &[
                "https://orcid.org/0000-0002-5274-8278",
                "http://aaa.orcid.org/0000-0002-5274-8278",
                "https://orcid.org/0000000252748278",
                "https://orcid.org/0000-00025274-8278",
            ],
            "https://orcid.org/0000-0002-5274-8278",
        );
    }

    #[test]
    fn test_normalize_periodo_and_chronontology() {
        let rules = authority_rules();
        assert_all_normalize_to(
            &rules,
            &[
                "http://n2t.net/ark:/99152/p0m63njncbv",
                "http://aaa.n2t.net/ark:/99152/p0m63njncbv",
            ],
            "https://n2t.net/ark:/99152/p0m63njncbv",
        );
        assert_all_normalize_to(
            &rules,
            &[
                "http://chronontology.dainst.org/period/rYh7ggsMyaSj",
                "http://aaa.chronontology.dainst.org/period/rYh7ggsMyaSj",
            ],
            "https://chronontology.dainst.org/period/rYh7ggsMyaSj",
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let rules = authority_rules();
        for input in [
            "http://aaa.geonames.org/276136/borj-ej-jaaiyat.html",
            "https://orcid.org/0000000252748278",
            "http://www.wikidata.org/wiki/Special:EntityData/Q42.json",
        ] {
            let once = rules.normalize(input, true).unwrap();
            let twice = rules.normalize(&once, true).unwrap();
            assert_eq!(once, twice, "input: {input}");
        }
    }

    #[test]
    fn test_normalize_first_rule_wins() {
        let rules = RuleSet::from_specs([
            RuleSpec::new(r"^https://example[.]org/([0-9]+)$", r"first:\1"),
            RuleSpec::new(r"^https://example[.]org/(.*)$", r"second:\1"),
        ])
        .unwrap();
        assert_eq!(rules.normalize("https://example.org/7", true).unwrap(), "first:7");
        assert_eq!(rules.normalize("https://example.org/x", true).unwrap(), "second:x");
    }

    #[test]
    fn test_normalize_no_match_required() {
        let err = authority_rules()
            .normalize("https://sample.uri", true)
            .unwrap_err();
        assert!(matches!(err, RuleError::NoMatch { .. }));
        assert_eq!(err.to_string(), "https://sample.uri doesn't match any rule");
    }

    #[test]
    fn test_normalize_no_match_passthrough() {
        let out = authority_rules()
            .normalize("https://sample.uri", false)
            .unwrap();
        assert_eq!(out, "https://sample.uri");
    }

    #[test]
    fn test_rule_rejects_undefined_group_at_construction() {
        let err = NormalizationRule::new(RuleSpec::new(r"^a(b)$", r"x\2")).unwrap_err();
        assert!(matches!(err, RuleError::Malformed { field: "replace", .. }));

        let err = NormalizationRule::new(
            RuleSpec::new(r"^a(b)$", r"x\1").with_resolve(r"http://x/\4", "text/turtle"),
        )
        .unwrap_err();
        assert!(matches!(err, RuleError::Malformed { field: "resolve", .. }));
    }

    #[test]
    fn test_rule_rejects_invalid_pattern() {
        let err = NormalizationRule::new(RuleSpec::new(r"^a(b$", "x")).unwrap_err();
        assert!(matches!(err, RuleError::InvalidPattern { .. }));
    }

    #[test]
    fn test_rule_empty_substitution_is_malformed() {
        let rules = RuleSet::from_specs([RuleSpec::new(r"^(x*)$", r"\1")]).unwrap();
        let err = rules.normalize("", true).unwrap_err();
        assert!(matches!(err, RuleError::Malformed { .. }));
    }

    #[test]
    fn test_resolvable_skips_rules_without_resolve_template() {
        let rules = RuleSet::from_specs([
            RuleSpec::new(r"^https://a[.]org/([0-9]+)$", r"https://a.org/\1"),
            RuleSpec::new(r"^https://a[.]org/([0-9]+)$", r"https://a.org/\1")
                .with_resolve(r"https://api.a.org/\1.nt", "application/n-triples"),
        ])
        .unwrap();
        let (rule, target) = rules.resolvable("https://a.org/5").unwrap();
        assert_eq!(target, "https://api.a.org/5.nt");
        assert_eq!(rule.format(), "application/n-triples");
    }

    #[test]
    fn test_resolvable_no_rule_with_template() {
        let err = authority_rules()
            .resolvable("http://chronontology.dainst.org/period/rYh7ggsMyaSj")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "http://chronontology.dainst.org/period/rYh7ggsMyaSj doesn't match any rule"
        );
    }

    #[test]
    fn test_rule_spec_deserializes_with_defaults() {
        let spec: RuleSpec =
            serde_json::from_str(r#"{"match": "^a(b)$", "replace": "\\1"}"#).unwrap();
        assert_eq!(spec.pattern, "^a(b)$");
        assert_eq!(spec.replace, r"\1");
        assert!(spec.resolve.is_empty());
        assert!(spec.head_fallback);
        assert!(spec.alternate_subject);
    }
}
