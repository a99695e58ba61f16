//! REST wrapper around the managed search index.

use crate::config::get_config;
use crate::index::types::{DocumentStatus, FacetBucket, IndexDocument, IndexHit, IndexPage, IndexQuery};
use crate::throttle::{ApiAuth, ApiCall, CallError, ThrottledClient};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Index field holding the embedding vector.
const EMBEDDING_FIELD: &str = "embedding";
/// Name of the vector profile wired into the embedding field.
const VECTOR_PROFILE: &str = "unit-vector-profile";
/// Name of the HNSW algorithm configuration.
const VECTOR_ALGORITHM: &str = "unit-hnsw";
/// Fields returned to search callers; the vector and group stamps stay
/// server-side.
const SELECT_FIELDS: &str =
    "id,title,content,headline,file_name,page_number,chunk_index,created_at,token_count,content_kind";

/// Connection settings for the search index.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Service endpoint, scheme and host only.
    pub endpoint: String,
    /// Admin API key.
    pub api_key: String,
    /// Name of the index documents live in.
    pub index_name: String,
    /// REST API version sent with every request.
    pub api_version: String,
    /// Dimension declared for the embedding field.
    pub embedding_dimension: usize,
}

impl IndexSettings {
    /// Settings drawn from the process configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            endpoint: config.search_endpoint.clone(),
            api_key: config.search_api_key.clone(),
            index_name: config.search_index.clone(),
            api_version: config.search_api_version.clone(),
            embedding_dimension: config.embedding_dimension,
        }
    }
}

/// Typed access to index management, uploads, and queries.
pub struct SearchIndexService {
    throttle: Arc<ThrottledClient>,
    settings: IndexSettings,
}

#[derive(Deserialize)]
struct BatchResponse {
    value: Vec<DocumentStatus>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(rename = "@odata.count", default)]
    count: Option<u64>,
    #[serde(rename = "@search.facets", default)]
    facets: BTreeMap<String, Vec<FacetBucket>>,
    #[serde(default)]
    value: Vec<IndexHit>,
}

impl SearchIndexService {
    /// Create a service over the shared throttled executor.
    pub fn new(throttle: Arc<ThrottledClient>, settings: IndexSettings) -> Self {
        Self { throttle, settings }
    }

    /// Name of the index this service operates on.
    pub fn index_name(&self) -> &str {
        &self.settings.index_name
    }

    /// Create the index, or update it in place to the expected schema.
    pub async fn ensure_index(&self) -> Result<(), CallError> {
        let call = ApiCall::new(Method::PUT, self.url(""))
            .auth(self.auth())
            .json(index_schema(
                &self.settings.index_name,
                self.settings.embedding_dimension,
            ));
        self.throttle.submit(call).await?;
        tracing::info!(index = %self.settings.index_name, "Search index ready");
        Ok(())
    }

    /// Delete the index. Absence counts as success.
    pub async fn delete_index(&self) -> Result<(), CallError> {
        let call = ApiCall::new(Method::DELETE, self.url("")).auth(self.auth());
        match self.throttle.submit(call).await {
            Ok(_) => {
                tracing::info!(index = %self.settings.index_name, "Search index deleted");
                Ok(())
            }
            Err(CallError::PermanentRequest { status: 404, .. }) => {
                tracing::debug!(index = %self.settings.index_name, "Search index already absent");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Total number of documents currently in the index.
    pub async fn document_count(&self) -> Result<u64, CallError> {
        let call = ApiCall::new(Method::GET, self.url("/docs/$count")).auth(self.auth());
        let response = self.throttle.submit(call).await?;
        response.body.as_u64().ok_or_else(|| {
            CallError::ValidationFailure("document count response was not a number".to_string())
        })
    }

    /// Merge-or-upload a batch of documents, returning the per-document
    /// verdicts.
    ///
    /// A mixed batch comes back as HTTP 207 with the same verdict shape, so
    /// callers always get one status per submitted document.
    pub async fn upload_batch(
        &self,
        documents: &[IndexDocument],
    ) -> Result<Vec<DocumentStatus>, CallError> {
        let mut actions = Vec::with_capacity(documents.len());
        for document in documents {
            let mut value = serde_json::to_value(document).map_err(|err| {
                CallError::ValidationFailure(format!(
                    "failed to encode document {}: {err}",
                    document.id
                ))
            })?;
            if let Value::Object(fields) = &mut value {
                fields.insert(
                    "@search.action".to_string(),
                    Value::String("mergeOrUpload".to_string()),
                );
            }
            actions.push(value);
        }

        let call = ApiCall::new(Method::POST, self.url("/docs/index"))
            .auth(self.auth())
            .json(json!({ "value": actions }));
        let response = self.throttle.submit(call).await?;
        let parsed: BatchResponse = response.json_as()?;
        Ok(parsed.value)
    }

    /// Run a query and return one page of results.
    pub async fn search(&self, query: &IndexQuery) -> Result<IndexPage, CallError> {
        let mut body = Map::new();
        body.insert("top".to_string(), json!(query.top));
        body.insert("count".to_string(), json!(query.include_total));
        body.insert("select".to_string(), json!(SELECT_FIELDS));
        if let Some(text) = &query.search_text {
            body.insert("search".to_string(), json!(text));
        }
        if let Some(filter) = &query.filter {
            body.insert("filter".to_string(), json!(filter));
        }
        if !query.facets.is_empty() {
            body.insert("facets".to_string(), json!(query.facets));
        }
        if let Some(vector) = &query.vector {
            body.insert(
                "vectorQueries".to_string(),
                json!([{
                    "kind": "vector",
                    "vector": vector,
                    "fields": EMBEDDING_FIELD,
                    "k": query.top,
                }]),
            );
        }

        let call = ApiCall::new(Method::POST, self.url("/docs/search"))
            .auth(self.auth())
            .json(Value::Object(body));
        let response = self.throttle.submit(call).await?;
        let parsed: SearchResponse = response.json_as()?;
        tracing::debug!(
            index = %self.settings.index_name,
            hits = parsed.value.len(),
            total = parsed.count,
            "Query served"
        );
        Ok(IndexPage {
            results: parsed.value,
            total_count: parsed.count,
            facets: parsed.facets,
        })
    }

    fn auth(&self) -> ApiAuth {
        ApiAuth::ApiKey(self.settings.api_key.clone())
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/indexes/{}{}?api-version={}",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.index_name,
            suffix,
            self.settings.api_version
        )
    }
}

/// Index schema: searchable text fields, a vector field under an HNSW
/// profile, and the filterable group stamps trimming relies on.
fn index_schema(name: &str, dimensions: usize) -> Value {
    json!({
        "name": name,
        "fields": [
            { "name": "id", "type": "Edm.String", "key": true, "filterable": true },
            { "name": "title", "type": "Edm.String", "searchable": true },
            { "name": "content", "type": "Edm.String", "searchable": true },
            { "name": "headline", "type": "Edm.String", "searchable": true },
            {
                "name": EMBEDDING_FIELD,
                "type": "Collection(Edm.Single)",
                "searchable": true,
                "retrievable": false,
                "dimensions": dimensions,
                "vectorSearchProfile": VECTOR_PROFILE
            },
            { "name": "file_name", "type": "Edm.String", "filterable": true, "facetable": true },
            { "name": "page_number", "type": "Edm.Int32", "filterable": true, "sortable": true },
            { "name": "chunk_index", "type": "Edm.Int32", "filterable": true, "sortable": true },
            { "name": "created_at", "type": "Edm.String", "filterable": true },
            { "name": "token_count", "type": "Edm.Int32", "filterable": true },
            { "name": "content_kind", "type": "Edm.String", "filterable": true, "facetable": true },
            { "name": "access_groups", "type": "Collection(Edm.String)", "filterable": true },
            { "name": "default_group", "type": "Edm.String", "filterable": true }
        ],
        "vectorSearch": {
            "algorithms": [
                { "name": VECTOR_ALGORITHM, "kind": "hnsw" }
            ],
            "profiles": [
                { "name": VECTOR_PROFILE, "algorithm": VECTOR_ALGORITHM }
            ]
        }
    })
}
