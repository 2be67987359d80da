//! Line-based N-Triples reader.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use super::{MetadataGraph, MetadataParser, ParseError, Triple};

/// Registered media type for N-Triples.
pub const NTRIPLES_MEDIA_TYPE: &str = "application/n-triples";

/// `<subject> <predicate> object .` with IRI or blank-node subjects.
#[allow(clippy::expect_used)]
static STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(<[^>]*>|_:\S+)\s+<([^>]*)>\s+(.+)\s*\.\s*$")
        .expect("N-Triples statement regex is valid") // Static pattern, safe to panic
});

/// Parser for `application/n-triples` (and `text/plain`, its legacy type).
#[derive(Debug, Clone, Copy, Default)]
pub struct NTriplesParser;

impl NTriplesParser {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn accepts(content_type: &str) -> bool {
        matches!(content_type, NTRIPLES_MEDIA_TYPE | "text/plain")
    }
}

impl MetadataParser for NTriplesParser {
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    fn parse(&self, body: &[u8], content_type: &str) -> Result<MetadataGraph, ParseError> {
        if !Self::accepts(content_type) {
            return Err(ParseError::UnsupportedFormat {
                content_type: content_type.to_string(),
            });
        }
        let text = std::str::from_utf8(body).map_err(|e| ParseError::InvalidEncoding {
            reason: e.to_string(),
        })?;

        let mut graph = MetadataGraph::default();
        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let caps = STATEMENT.captures(trimmed).ok_or_else(|| ParseError::Syntax {
                line: idx + 1,
                content: trimmed.to_string(),
            })?;
            graph.push(Triple::new(
                strip_iri(&caps[1]),
                &caps[2],
                strip_iri(caps[3].trim()),
            ));
        }
        debug!(triples = graph.len(), "Parsed N-Triples");
        Ok(graph)
    }
}

fn strip_iri(term: &str) -> &str {
    term.strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .unwrap_or(term)
}
