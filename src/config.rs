//! File configuration for the normalizer.
//!
//! All sections are optional:
//!
//! ```toml
//! id_property = "https://vocabs.acdh.oeaw.ac.at/schema#hasIdentifier"
//! rules_file = "rules.json"          # merged after the inline [[rules]]
//!
//! [retry]
//! max_attempts = 3
//! base_delay_secs = 0.5
//! scale = "multiplicative"
//! retryable_statuses = [429, 502, 503, 504]
//!
//! [cache]
//! sqlite_path = "/var/cache/uri-normalizer.sqlite"
//! ttl_secs = 86400
//!
//! [http]
//! connect_timeout_secs = 10
//! read_timeout_secs = 30
//! max_redirects = 20
//!
//! [[rules]]
//! match = '^https?://orcid[.]org/([0-9X-]+)$'
//! replace = 'https://orcid.org/\1'
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{CacheError, DEFAULT_TTL, ResultCache, SqliteCache};
use crate::normalizer::UriNormalizer;
use crate::resolver::DEFAULT_MAX_REDIRECTS;
use crate::retry::{BackoffScale, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRYABLE_STATUSES, RetryPolicy};
use crate::rules::{RuleError, RuleSet, RuleSpec};
use crate::transport::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, ReqwestTransport, TransportError};

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config or rules file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A TOML file is not valid for its schema.
    #[error("Failed to parse config file '{path}': {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A JSON rules file is not valid for its schema.
    #[error("Failed to parse rules file '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A value is out of its accepted range.
    #[error("Invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub scale: BackoffScale,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_secs: 0.0,
            scale: BackoffScale::Constant,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetrySection {
    /// Converts the section into a policy. Call after validation.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        let base = Duration::try_from_secs_f64(self.base_delay_secs).unwrap_or_default();
        RetryPolicy::new(self.max_attempts, base, self.scale)
            .with_retryable_statuses(self.retryable_statuses.iter().copied())
    }
}

/// `[cache]` section.
///
/// The in-process tier is always on; these settings control the durable tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    /// Set to `false` to ignore `sqlite_path`.
    pub enabled: bool,
    pub sqlite_path: Option<PathBuf>,
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            sqlite_path: None,
            ttl_secs: DEFAULT_TTL.as_secs(),
        }
    }
}

/// `[http]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpSection {
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub max_redirects: usize,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizerConfig {
    /// Default property for `normalize_meta`.
    pub id_property: Option<String>,
    /// Extra rule table (`.json` or `.toml`), appended after `rules`.
    pub rules_file: Option<PathBuf>,
    pub retry: RetrySection,
    pub cache: CacheSection,
    pub http: HttpSection,
    pub rules: Vec<RuleSpec>,
}

/// A rules-only TOML file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

impl NormalizerConfig {
    /// Parses TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Toml`] on syntax or schema errors and
    /// [`ConfigError::Invalid`] on out-of-range values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Toml {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the file at `path`.
    ///
    /// A relative `rules_file` is resolved against the directory of `path`
    /// and its rules are appended to the inline ones.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a file cannot be read, parsed or validated.
    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = read(path)?;
        let mut config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(rules_file) = &config.rules_file {
            let rules_path = match path.parent() {
                Some(dir) if rules_file.is_relative() => dir.join(rules_file),
                _ => rules_file.clone(),
            };
            let extra = load_rules_file(&rules_path)?;
            debug!(file = %rules_path.display(), rules = extra.len(), "Loaded rules file");
            config.rules.extend(extra);
        }

        config.validate()?;
        info!(rules = config.rules.len(), "Configuration loaded");
        Ok(config)
    }

    /// Loads the default config file when it exists.
    ///
    /// # Errors
    ///
    /// Same as [`NormalizerConfig::load`].
    pub fn load_default() -> Result<Option<Self>, ConfigError> {
        match resolve_default_config_path() {
            Some(path) if path.exists() => Self::load(&path).map(Some),
            _ => Ok(None),
        }
    }

    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Invalid`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let delay = self.retry.base_delay_secs;
        if !delay.is_finite() || delay < 0.0 {
            return Err(ConfigError::invalid(
                "retry.base_delay_secs",
                delay,
                "a finite, non-negative number of seconds",
            ));
        }
        if let Some(status) = self
            .retry
            .retryable_statuses
            .iter()
            .find(|s| !(100..=599).contains(*s))
        {
            return Err(ConfigError::invalid(
                "retry.retryable_statuses",
                status,
                "range: 100..=599",
            ));
        }

        validate_timeout_secs("http.connect_timeout_secs", self.http.connect_timeout_secs)?;
        validate_timeout_secs("http.read_timeout_secs", self.http.read_timeout_secs)?;
        if !(1..=100).contains(&self.http.max_redirects) {
            return Err(ConfigError::invalid(
                "http.max_redirects",
                self.http.max_redirects,
                "range: 1..=100",
            ));
        }

        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::invalid("cache.ttl_secs", 0, "range: 1.."));
        }
        if matches!(&self.id_property, Some(p) if p.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "id_property",
                "\"\"",
                "a non-empty property URI",
            ));
        }
        Ok(())
    }

    /// Compiles the rule table.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Rule`] for the first invalid rule.
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        Ok(RuleSet::from_specs(self.rules.iter().cloned())?)
    }

    /// Builds the result cache, opening the durable tier when configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Cache`] when the SQLite file cannot be opened.
    pub async fn result_cache(&self) -> Result<ResultCache, ConfigError> {
        let ttl = Duration::from_secs(self.cache.ttl_secs);
        match &self.cache.sqlite_path {
            Some(path) if self.cache.enabled => {
                let durable = SqliteCache::open(path, ttl).await?;
                Ok(ResultCache::with_durable(durable).with_ttl(ttl))
            }
            _ => Ok(ResultCache::in_memory()),
        }
    }

    /// Builds a ready-to-use normalizer with the reqwest transport.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when rules, cache or HTTP client setup fails.
    pub async fn build_normalizer(&self) -> Result<UriNormalizer, ConfigError> {
        let transport = ReqwestTransport::with_timeouts(
            Duration::from_secs(self.http.connect_timeout_secs),
            Duration::from_secs(self.http.read_timeout_secs),
        )?;

        let mut builder = UriNormalizer::builder()
            .rules(self.rule_set()?)
            .transport(Arc::new(transport))
            .retry_policy(self.retry.to_policy())
            .cache(self.result_cache().await?)
            .max_redirects(self.http.max_redirects);
        if let Some(property) = &self.id_property {
            builder = builder.id_property(property.clone());
        }
        Ok(builder.build()?)
    }
}

/// Authority rule table shipped with the crate (`rules.toml`).
pub const BUNDLED_RULES: &str = include_str!("../rules.toml");

/// Parses [`BUNDLED_RULES`].
///
/// # Errors
///
/// Returns [`ConfigError::Toml`] if the bundled table does not parse.
pub fn bundled_rules() -> Result<Vec<RuleSpec>, ConfigError> {
    let file: RulesFile = toml::from_str(BUNDLED_RULES).map_err(|source| ConfigError::Toml {
        path: PathBuf::from("rules.toml"),
        source,
    })?;
    Ok(file.rules)
}

/// Loads a standalone rule table: a JSON array of records, or a TOML file
/// with `[[rules]]` entries.
///
/// # Errors
///
/// Returns [`ConfigError::Io`], [`ConfigError::Json`] or [`ConfigError::Toml`].
pub fn load_rules_file(path: &Path) -> Result<Vec<RuleSpec>, ConfigError> {
    let raw = read(path)?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        return serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        });
    }
    let file: RulesFile = toml::from_str(&raw).map_err(|source| ConfigError::Toml {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.rules)
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/uri-normalizer/config.toml`
/// 2. `$HOME/.config/uri-normalizer/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("uri-normalizer")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("uri-normalizer")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::invalid(field, value, "range: 1..=3600"));
    }
    Ok(())
}
