//! Request and outcome types for the secured search gateway.

use crate::index::{FacetBucket, IndexHit};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

/// Query strategies the gateway can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    /// Lexical matching only.
    Text,
    /// Vector similarity only.
    Vector,
    /// Lexical and vector signals fused by the index.
    #[default]
    Hybrid,
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "vector" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown search mode '{other}'")),
        }
    }
}

/// One caller query as accepted by the gateway.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Natural-language query text.
    pub query: String,
    /// Principal the results must be trimmed for.
    pub principal_id: String,
    /// Query strategy.
    pub mode: SearchMode,
    /// Maximum results to return.
    pub top: usize,
    /// Whether to request the total match count.
    pub include_total: bool,
    /// Extra OData predicate conjoined with the security filter.
    pub extra_filter: Option<String>,
    /// Fields to facet on.
    pub facets: Vec<String>,
}

impl SearchRequest {
    /// A hybrid request with default paging.
    pub fn new(query: impl Into<String>, principal_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            principal_id: principal_id.into(),
            mode: SearchMode::Hybrid,
            top: 10,
            include_total: false,
            extra_filter: None,
            facets: Vec::new(),
        }
    }
}

/// How the gateway settled a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchDisposition {
    /// The query ran and the results reflect the caller's access.
    Fulfilled,
    /// The caller holds no accessible groups; the index was never queried.
    NoAccessibleGroups,
    /// Group resolution failed; the index was never queried.
    ResolutionFailed(String),
    /// The index query failed, or a pure vector query lost its embedding.
    QueryFailed(String),
}

/// Trimmed results plus how the request was settled.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Result rows, scores as the index reported them.
    pub results: Vec<IndexHit>,
    /// Total match count, when requested.
    pub total_count: Option<u64>,
    /// Facet buckets keyed by field name.
    pub facets: BTreeMap<String, Vec<FacetBucket>>,
    /// How the request was settled.
    pub disposition: SearchDisposition,
}

impl SearchOutcome {
    /// An outcome carrying no results.
    pub(crate) fn empty(disposition: SearchDisposition) -> Self {
        Self {
            results: Vec::new(),
            total_count: None,
            facets: BTreeMap::new(),
            disposition,
        }
    }
}

/// Aggregate visibility numbers for one principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalStatistics {
    /// Documents the principal's trimmed filter matches.
    pub accessible_documents: u64,
    /// Distinct source files among those documents.
    pub accessible_files: usize,
    /// Accessible groups the numbers were computed under.
    pub groups: BTreeSet<String>,
}

impl PrincipalStatistics {
    /// Statistics for a principal who can see nothing.
    pub(crate) fn empty() -> Self {
        Self {
            accessible_documents: 0,
            accessible_files: 0,
            groups: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!("text".parse::<SearchMode>(), Ok(SearchMode::Text));
        assert_eq!("Vector".parse::<SearchMode>(), Ok(SearchMode::Vector));
        assert_eq!("HYBRID".parse::<SearchMode>(), Ok(SearchMode::Hybrid));
        assert!("fuzzy".parse::<SearchMode>().is_err());
    }

    #[test]
    fn new_requests_default_to_hybrid_top_ten() {
        let request = SearchRequest::new("q", "user-1");
        assert_eq!(request.mode, SearchMode::Hybrid);
        assert_eq!(request.top, 10);
        assert!(!request.include_total);
        assert!(request.extra_filter.is_none());
    }
}
