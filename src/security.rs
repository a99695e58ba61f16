//! Security-trimming filter construction for search queries.
//!
//! Every query leaving the gateway carries a filter derived from the caller's
//! accessible groups. The builder is pure string assembly over the index's
//! `access_groups` collection field; resolving memberships and deciding which
//! groups are accessible happens elsewhere.

use std::collections::BTreeSet;
use std::fmt;

/// Reserved group id used to build an unsatisfiable filter.
///
/// Configuration validation rejects this value as a real group id, so a
/// predicate over it can never match a document.
pub const NO_ACCESS_SENTINEL: &str = "no-access";

/// Index field holding the group ids a document is visible to.
pub const ACCESS_GROUPS_FIELD: &str = "access_groups";

/// OData predicate restricting results to a caller's accessible groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityFilter(String);

impl SecurityFilter {
    /// Build the trimming predicate for a set of accessible group ids.
    ///
    /// An empty set yields a filter over [`NO_ACCESS_SENTINEL`], which matches
    /// nothing. Sets are iterated in sorted order so the produced string is
    /// deterministic.
    pub fn for_groups(accessible: &BTreeSet<String>) -> Self {
        if accessible.is_empty() {
            return Self(group_term(NO_ACCESS_SENTINEL));
        }

        let terms: Vec<String> = accessible.iter().map(|group| group_term(group)).collect();
        Self(terms.join(" or "))
    }

    /// Conjoin a caller-supplied filter with this one.
    ///
    /// Both sides are parenthesized so the caller expression can only narrow
    /// the accessible set, never widen it. Blank caller filters leave the
    /// security predicate untouched.
    pub fn and_with(self, caller_filter: &str) -> Self {
        let trimmed = caller_filter.trim();
        if trimmed.is_empty() {
            return self;
        }
        Self(format!("({}) and ({trimmed})", self.0))
    }

    /// Borrow the predicate string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the filter, returning the predicate string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SecurityFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn group_term(group: &str) -> String {
    format!(
        "{ACCESS_GROUPS_FIELD}/any(g: g eq '{}')",
        escape_odata(group)
    )
}

/// Escape a string literal for inclusion in an OData expression.
///
/// OData escapes embedded single quotes by doubling them.
pub(crate) fn escape_odata(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn empty_set_yields_unsatisfiable_sentinel() {
        let filter = SecurityFilter::for_groups(&BTreeSet::new());
        assert_eq!(filter.as_str(), "access_groups/any(g: g eq 'no-access')");
    }

    #[test]
    fn single_group_produces_one_term() {
        let filter = SecurityFilter::for_groups(&groups(&["sales"]));
        assert_eq!(filter.as_str(), "access_groups/any(g: g eq 'sales')");
    }

    #[test]
    fn multiple_groups_join_with_or_in_sorted_order() {
        let filter = SecurityFilter::for_groups(&groups(&["ops", "engineering"]));
        assert_eq!(
            filter.as_str(),
            "access_groups/any(g: g eq 'engineering') or access_groups/any(g: g eq 'ops')"
        );
    }

    #[test]
    fn embedded_quotes_are_doubled() {
        let filter = SecurityFilter::for_groups(&groups(&["o'brien-team"]));
        assert_eq!(filter.as_str(), "access_groups/any(g: g eq 'o''brien-team')");
    }

    #[test]
    fn caller_filter_is_conjoined_with_parentheses() {
        let filter = SecurityFilter::for_groups(&groups(&["sales"])).and_with("page_number gt 3");
        assert_eq!(
            filter.as_str(),
            "(access_groups/any(g: g eq 'sales')) and (page_number gt 3)"
        );
    }

    #[test]
    fn blank_caller_filter_changes_nothing() {
        let base = SecurityFilter::for_groups(&groups(&["sales"]));
        let combined = base.clone().and_with("   ");
        assert_eq!(combined, base);
    }

    #[test]
    fn sentinel_composes_like_any_other_filter() {
        let filter = SecurityFilter::for_groups(&BTreeSet::new()).and_with("chunk_index eq 0");
        assert_eq!(
            filter.as_str(),
            "(access_groups/any(g: g eq 'no-access')) and (chunk_index eq 0)"
        );
    }
}
