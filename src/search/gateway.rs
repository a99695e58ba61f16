//! Permission-trimmed query orchestration.
//!
//! The gateway owns the only path from a caller to the index. Every request
//! resolves the caller's directory groups, intersects them with the groups
//! documents are stamped with, and attaches the resulting filter to the index
//! query. When that context cannot be established the index is never
//! touched.

use crate::embedding::EmbeddingClient;
use crate::graph::{GraphError, GroupMembershipResolver};
use crate::index::{IndexHit, IndexQuery, SearchIndexService};
use crate::metrics::ActivityMetrics;
use crate::search::types::{
    PrincipalStatistics, SearchDisposition, SearchMode, SearchOutcome, SearchRequest,
};
use crate::security::{self, SecurityFilter};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Field faceted for per-principal statistics.
const FILE_FACET: &str = "file_name";

/// Serves queries trimmed to what the caller is allowed to see.
pub struct SearchGateway {
    index: Arc<SearchIndexService>,
    embeddings: Arc<EmbeddingClient>,
    resolver: Arc<GroupMembershipResolver>,
    metrics: Arc<ActivityMetrics>,
    document_groups: BTreeSet<String>,
}

impl SearchGateway {
    /// Create a gateway over the given components.
    ///
    /// `document_groups` is the set of group ids documents get stamped with;
    /// memberships outside it grant no access.
    pub fn new(
        index: Arc<SearchIndexService>,
        embeddings: Arc<EmbeddingClient>,
        resolver: Arc<GroupMembershipResolver>,
        metrics: Arc<ActivityMetrics>,
        document_groups: BTreeSet<String>,
    ) -> Self {
        Self {
            index,
            embeddings,
            resolver,
            metrics,
            document_groups,
        }
    }

    /// Run a trimmed search for the caller.
    pub async fn search(&self, request: &SearchRequest) -> SearchOutcome {
        let accessible = match self.accessible_groups(&request.principal_id).await {
            Ok(groups) => groups,
            Err(error) => {
                tracing::warn!(
                    principal = %request.principal_id,
                    error = %error,
                    "Refusing search; group resolution failed"
                );
                return SearchOutcome::empty(SearchDisposition::ResolutionFailed(
                    error.to_string(),
                ));
            }
        };
        if accessible.is_empty() {
            tracing::info!(
                principal = %request.principal_id,
                "Caller holds no accessible groups"
            );
            return SearchOutcome::empty(SearchDisposition::NoAccessibleGroups);
        }

        let mut filter = SecurityFilter::for_groups(&accessible);
        if let Some(extra) = &request.extra_filter {
            filter = filter.and_with(extra);
        }

        let (search_text, vector) = match request.mode {
            SearchMode::Text => (Some(request.query.clone()), None),
            SearchMode::Vector => match self.embeddings.embed(&request.query).await {
                Ok(vector) => (None, Some(vector)),
                Err(error) => {
                    tracing::error!(error = %error, "Query embedding failed; vector query cannot run");
                    return SearchOutcome::empty(SearchDisposition::QueryFailed(format!(
                        "query embedding failed: {error}"
                    )));
                }
            },
            SearchMode::Hybrid => match self.embeddings.embed(&request.query).await {
                Ok(vector) => (Some(request.query.clone()), Some(vector)),
                Err(error) => {
                    tracing::warn!(error = %error, "Query embedding failed; degrading to text search");
                    (Some(request.query.clone()), None)
                }
            },
        };

        let query = IndexQuery {
            search_text,
            vector,
            filter: Some(filter.into_string()),
            top: request.top,
            include_total: request.include_total,
            facets: request.facets.clone(),
        };
        match self.index.search(&query).await {
            Ok(page) => {
                self.metrics.record_search();
                SearchOutcome {
                    results: page.results,
                    total_count: page.total_count,
                    facets: page.facets,
                    disposition: SearchDisposition::Fulfilled,
                }
            }
            Err(error) => {
                tracing::error!(
                    principal = %request.principal_id,
                    error = %error,
                    "Index query failed"
                );
                SearchOutcome::empty(SearchDisposition::QueryFailed(error.to_string()))
            }
        }
    }

    /// Fetch one document by id, trimmed to the caller's access.
    ///
    /// Returns `None` when the document is absent, out of the caller's reach,
    /// or the caller's context cannot be established.
    pub async fn document_by_id(&self, document_id: &str, principal_id: &str) -> Option<IndexHit> {
        let accessible = match self.accessible_groups(principal_id).await {
            Ok(groups) if !groups.is_empty() => groups,
            Ok(_) => {
                tracing::info!(principal = principal_id, "Caller holds no accessible groups");
                return None;
            }
            Err(error) => {
                tracing::warn!(
                    principal = principal_id,
                    error = %error,
                    "Refusing lookup; group resolution failed"
                );
                return None;
            }
        };

        let id_predicate = format!("id eq '{}'", security::escape_odata(document_id));
        let query = IndexQuery {
            search_text: Some("*".to_string()),
            vector: None,
            filter: Some(
                SecurityFilter::for_groups(&accessible)
                    .and_with(&id_predicate)
                    .into_string(),
            ),
            top: 1,
            include_total: false,
            facets: Vec::new(),
        };
        match self.index.search(&query).await {
            Ok(page) => page.results.into_iter().next(),
            Err(error) => {
                tracing::error!(document = document_id, error = %error, "Document lookup failed");
                None
            }
        }
    }

    /// Aggregate visibility numbers for a principal.
    ///
    /// Counts come from a zero-row query with a total count and a file facet,
    /// so nothing document-shaped leaves the index.
    pub async fn principal_statistics(&self, principal_id: &str) -> PrincipalStatistics {
        let accessible = match self.accessible_groups(principal_id).await {
            Ok(groups) => groups,
            Err(error) => {
                tracing::warn!(
                    principal = principal_id,
                    error = %error,
                    "Statistics unavailable; group resolution failed"
                );
                return PrincipalStatistics::empty();
            }
        };
        if accessible.is_empty() {
            return PrincipalStatistics::empty();
        }

        let query = IndexQuery {
            search_text: Some("*".to_string()),
            vector: None,
            filter: Some(SecurityFilter::for_groups(&accessible).into_string()),
            top: 0,
            include_total: true,
            facets: vec![FILE_FACET.to_string()],
        };
        match self.index.search(&query).await {
            Ok(page) => PrincipalStatistics {
                accessible_documents: page.total_count.unwrap_or(0),
                accessible_files: page
                    .facets
                    .get(FILE_FACET)
                    .map(|buckets| buckets.len())
                    .unwrap_or(0),
                groups: accessible,
            },
            Err(error) => {
                tracing::error!(
                    principal = principal_id,
                    error = %error,
                    "Statistics query failed"
                );
                PrincipalStatistics::empty()
            }
        }
    }

    /// Groups the caller may search under: directory memberships intersected
    /// with the configured document groups.
    async fn accessible_groups(&self, principal_id: &str) -> Result<BTreeSet<String>, GraphError> {
        let memberships = self.resolver.resolve(principal_id).await?;
        Ok(memberships
            .intersection(&self.document_groups)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiFlavor;
    use crate::embedding::EmbeddingSettings;
    use crate::graph::GraphSettings;
    use crate::index::IndexSettings;
    use crate::throttle::{RateWindow, ThrottledClient};
    use httpmock::{Method::GET, Method::POST, MockServer};
    use reqwest::Client;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn gateway(server: &MockServer, document_groups: &[&str]) -> SearchGateway {
        let throttle = Arc::new(ThrottledClient {
            client: Client::builder()
                .user_agent("docgate-test")
                .build()
                .expect("client"),
            gate: Semaphore::new(8),
            window: RateWindow::new(100, Duration::from_secs(60)),
            max_attempts: 1,
            retry_base: Duration::from_millis(1),
            retry_cap: Duration::from_secs(1),
        });
        let index = Arc::new(SearchIndexService::new(
            Arc::clone(&throttle),
            IndexSettings {
                endpoint: server.base_url(),
                api_key: "admin-key".to_string(),
                index_name: "units-test".to_string(),
                api_version: "2024-07-01".to_string(),
                embedding_dimension: 2,
            },
        ));
        let embeddings = Arc::new(EmbeddingClient::new(
            Arc::clone(&throttle),
            EmbeddingSettings {
                endpoint: server.url("/embeddings"),
                api_key: "secret".to_string(),
                flavor: ApiFlavor::Azure,
                model: None,
                dimension: 2,
                max_input_chars: 7000,
            },
        ));
        let resolver = Arc::new(GroupMembershipResolver::new(
            Arc::clone(&throttle),
            GraphSettings {
                graph_endpoint: server.url("/v1.0"),
                authority_host: server.base_url(),
                tenant_id: "tenant-1".to_string(),
                client_id: "client-1".to_string(),
                client_secret: "hush".to_string(),
                scope: "http://localhost/.default".to_string(),
                cache_ttl: Duration::from_secs(1800),
            },
        ));
        SearchGateway::new(
            index,
            embeddings,
            resolver,
            Arc::new(ActivityMetrics::new()),
            document_groups.iter().map(|g| g.to_string()).collect(),
        )
    }

    async fn mock_token(server: &MockServer) {
        server
            .mock_async(|when, then| {
                when.method(POST).path("/tenant-1/oauth2/v2.0/token");
                then.status(200)
                    .json_body(json!({ "access_token": "tok-1", "expires_in": 3600 }));
            })
            .await;
    }

    async fn mock_memberships(server: &MockServer, groups: &[&str]) {
        let value: Vec<serde_json::Value> = groups
            .iter()
            .map(|id| json!({ "@odata.type": "#microsoft.graph.group", "id": id }))
            .collect();
        server
            .mock_async(move |when, then| {
                when.method(GET).path("/v1.0/users/user-1/memberOf");
                then.status(200).json_body(json!({ "value": value }));
            })
            .await;
    }

    #[tokio::test]
    async fn filter_covers_only_the_intersection_of_memberships_and_stamps() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        mock_memberships(&server, &["g1", "g2", "outside"]).await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/units-test/docs/search")
                    .json_body_partial(
                        r#"{
                            "filter": "access_groups/any(g: g eq 'g1') or access_groups/any(g: g eq 'g2')"
                        }"#,
                    );
                then.status(200).json_body(json!({
                    "value": [{ "@search.score": 1.5, "id": "report_1_0" }]
                }));
            })
            .await;

        let gateway = gateway(&server, &["g1", "g2"]);
        let mut request = SearchRequest::new("quarterly revenue", "user-1");
        request.mode = SearchMode::Text;
        let outcome = gateway.search(&request).await;

        search.assert_async().await;
        assert_eq!(outcome.disposition, SearchDisposition::Fulfilled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].id, "report_1_0");
    }

    #[tokio::test]
    async fn disjoint_memberships_short_circuit_before_the_index() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        mock_memberships(&server, &["elsewhere"]).await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST).path("/indexes/units-test/docs/search");
                then.status(200).json_body(json!({ "value": [] }));
            })
            .await;

        let gateway = gateway(&server, &["g1"]);
        let mut request = SearchRequest::new("anything", "user-1");
        request.mode = SearchMode::Text;
        let outcome = gateway.search(&request).await;

        assert_eq!(search.hits_async().await, 0);
        assert_eq!(outcome.disposition, SearchDisposition::NoAccessibleGroups);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn resolution_failure_fails_closed() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1.0/users/user-1/memberOf");
                then.status(403).body("insufficient privileges");
            })
            .await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST).path("/indexes/units-test/docs/search");
                then.status(200).json_body(json!({ "value": [] }));
            })
            .await;

        let gateway = gateway(&server, &["g1"]);
        let outcome = gateway.search(&SearchRequest::new("anything", "user-1")).await;

        assert_eq!(search.hits_async().await, 0);
        assert!(matches!(
            outcome.disposition,
            SearchDisposition::ResolutionFailed(_)
        ));
    }

    #[tokio::test]
    async fn hybrid_degrades_to_text_when_the_query_embedding_fails() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        mock_memberships(&server, &["g1"]).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(500).body("embedding backend down");
            })
            .await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/units-test/docs/search")
                    .body_contains("\"search\":\"quarterly revenue\"");
                then.status(200).json_body(json!({
                    "value": [{ "@search.score": 0.9, "id": "report_1_0" }]
                }));
            })
            .await;

        let gateway = gateway(&server, &["g1"]);
        let outcome = gateway
            .search(&SearchRequest::new("quarterly revenue", "user-1"))
            .await;

        search.assert_async().await;
        assert_eq!(outcome.disposition, SearchDisposition::Fulfilled);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn pure_vector_query_fails_when_the_embedding_fails() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        mock_memberships(&server, &["g1"]).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(500).body("embedding backend down");
            })
            .await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST).path("/indexes/units-test/docs/search");
                then.status(200).json_body(json!({ "value": [] }));
            })
            .await;

        let gateway = gateway(&server, &["g1"]);
        let mut request = SearchRequest::new("anything", "user-1");
        request.mode = SearchMode::Vector;
        let outcome = gateway.search(&request).await;

        assert_eq!(search.hits_async().await, 0);
        assert!(matches!(
            outcome.disposition,
            SearchDisposition::QueryFailed(_)
        ));
    }

    #[tokio::test]
    async fn document_lookup_composes_id_and_security_predicates() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        mock_memberships(&server, &["g1"]).await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/units-test/docs/search")
                    .json_body_partial(
                        r#"{
                            "filter": "(access_groups/any(g: g eq 'g1')) and (id eq 'report_1_0')",
                            "top": 1
                        }"#,
                    );
                then.status(200).json_body(json!({
                    "value": [{ "@search.score": 1.0, "id": "report_1_0" }]
                }));
            })
            .await;

        let gateway = gateway(&server, &["g1"]);
        let hit = gateway.document_by_id("report_1_0", "user-1").await;

        search.assert_async().await;
        assert_eq!(hit.expect("hit").id, "report_1_0");
    }

    #[tokio::test]
    async fn statistics_count_documents_and_files_without_rows() {
        let server = MockServer::start_async().await;
        mock_token(&server).await;
        mock_memberships(&server, &["g1"]).await;
        let search = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/indexes/units-test/docs/search")
                    .json_body_partial(r#"{ "top": 0, "count": true, "facets": ["file_name"] }"#);
                then.status(200).json_body(json!({
                    "@odata.count": 37,
                    "@search.facets": {
                        "file_name": [
                            { "value": "report.pdf", "count": 30 },
                            { "value": "notes.pdf", "count": 7 }
                        ]
                    },
                    "value": []
                }));
            })
            .await;

        let gateway = gateway(&server, &["g1"]);
        let stats = gateway.principal_statistics("user-1").await;

        search.assert_async().await;
        assert_eq!(stats.accessible_documents, 37);
        assert_eq!(stats.accessible_files, 2);
        assert_eq!(stats.groups, BTreeSet::from(["g1".to_string()]));
    }
}
