//! Results produced by the three public operations.

use serde::{Deserialize, Serialize};

use crate::metadata::MetadataGraph;

/// A validated metadata request, as returned by `resolve`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRequest {
    /// The URI the caller asked for.
    pub uri: String,
    /// URL of the final, non-redirect response.
    pub final_url: String,
    /// HTTP method that produced the final response (`HEAD` or `GET`).
    pub method: String,
    /// Final response status.
    pub status: u16,
    /// Validated content type.
    pub format: String,
}

/// Metadata fetched for an identifier, as returned by `fetch`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedMetadata {
    /// The URI the caller asked for.
    pub uri: String,
    /// Subject the statements were found under; either `uri` or the canonical
    /// form of `final_url`.
    pub subject: String,
    /// URL of the final, non-redirect response.
    pub final_url: String,
    /// Content type the body was parsed as.
    pub format: String,
    /// Everything the authority returned.
    pub graph: MetadataGraph,
}

impl FetchedMetadata {
    /// Statements about [`Self::subject`].
    pub fn subject_statements(&self) -> impl Iterator<Item = &crate::metadata::Triple> {
        self.graph.statements_about(&self.subject)
    }
}

/// A cached result tagged by the operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    Normalized(String),
    Resolved(ResolvedRequest),
    Fetched(FetchedMetadata),
}

impl ResolutionOutcome {
    #[must_use]
    pub fn as_normalized(&self) -> Option<&str> {
        match self {
            Self::Normalized(uri) => Some(uri),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_resolved(&self) -> Option<&ResolvedRequest> {
        match self {
            Self::Resolved(request) => Some(request),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_fetched(&self) -> Option<&FetchedMetadata> {
        match self {
            Self::Fetched(meta) => Some(meta),
            _ => None,
        }
    }
}
