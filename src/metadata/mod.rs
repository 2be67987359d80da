//! Metadata graphs and the parser seam used by `fetch`.
//!
//! The resolver hands the fetched body and its expected format to a
//! [`MetadataParser`] and then asks whether the resulting [`MetadataGraph`]
//! holds any statement about the requested subject. Full RDF processing is
//! left to parser implementations; [`NTriplesParser`] covers the line-based
//! N-Triples serialization most authorities offer.

mod ntriples;

pub use ntriples::{NTRIPLES_MEDIA_TYPE, NTriplesParser};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing a fetched representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The parser does not understand this content type.
    #[error("unsupported metadata format '{content_type}'")]
    UnsupportedFormat {
        /// The rejected content type
        content_type: String,
    },

    /// The body is not valid UTF-8.
    #[error("metadata body is not valid UTF-8: {reason}")]
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// A statement could not be parsed.
    #[error("syntax error on line {line}: {content}")]
    Syntax {
        /// 1-based line number
        line: usize,
        /// The offending line
        content: String,
    },
}

/// One subject/predicate/object statement.
///
/// IRIs are stored without angle brackets; literals and blank nodes keep their
/// serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

impl Triple {
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

/// A parsed set of statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataGraph {
    triples: Vec<Triple>,
}

impl MetadataGraph {
    #[must_use]
    pub fn new(triples: Vec<Triple>) -> Self {
        Self { triples }
    }

    pub fn push(&mut self, triple: Triple) {
        self.triples.push(triple);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    #[must_use]
    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    /// Statements whose subject is `uri`.
    pub fn statements_about<'a>(&'a self, uri: &'a str) -> impl Iterator<Item = &'a Triple> + 'a {
        self.triples.iter().filter(move |t| t.subject == uri)
    }

    #[must_use]
    pub fn has_statements_about(&self, uri: &str) -> bool {
        self.statements_about(uri).next().is_some()
    }

    /// Object values of `predicate` for `subject`.
    pub fn objects<'a>(
        &'a self,
        subject: &'a str,
        predicate: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.statements_about(subject)
            .filter(move |t| t.predicate == predicate)
            .map(|t| t.object.as_str())
    }
}

impl FromIterator<Triple> for MetadataGraph {
    fn from_iter<T: IntoIterator<Item = Triple>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Turns fetched bytes into a [`MetadataGraph`].
pub trait MetadataParser: Send + Sync {
    /// Parses `body` serialized as `content_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] when the format is unsupported or the body is
    /// malformed.
    fn parse(&self, body: &[u8], content_type: &str) -> Result<MetadataGraph, ParseError>;

    /// Whether `graph` holds statements about `uri`.
    fn subject_has_statements(&self, graph: &MetadataGraph, uri: &str) -> bool {
        graph.has_statements_about(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MetadataGraph {
        [
            Triple::new("https://a.org/1", "http://schema.org/name", "\"One\""),
            Triple::new("https://a.org/1", "http://schema.org/sameAs", "https://b.org/x"),
            Triple::new("https://a.org/2", "http://schema.org/name", "\"Two\""),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_graph_has_statements_about() {
        let graph = sample();
        assert!(graph.has_statements_about("https://a.org/1"));
        assert!(!graph.has_statements_about("https://a.org/3"));
    }

    #[test]
    fn test_graph_objects_filters_predicate() {
        let graph = sample();
        let names: Vec<_> = graph
            .objects("https://a.org/1", "http://schema.org/name")
            .collect();
        assert_eq!(names, vec!["\"One\""]);
    }

    #[test]
    fn test_graph_serde_round_trip() {
        let graph = sample();
        let json = serde_json::to_string(&graph).unwrap_or_default();
        let back: MetadataGraph = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(graph, back);
    }
}
