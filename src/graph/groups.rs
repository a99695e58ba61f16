//! Group membership resolution with per-principal TTL caching.

use crate::graph::token::TokenProvider;
use crate::graph::{GraphError, GraphSettings};
use crate::throttle::{ApiAuth, ApiCall, ThrottledClient};
use reqwest::Method;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Directory object type kept when walking membership pages.
const GROUP_TYPE: &str = "#microsoft.graph.group";

#[derive(Deserialize)]
struct MembershipPage {
    #[serde(default)]
    value: Vec<DirectoryObject>,
    #[serde(rename = "@odata.nextLink", default)]
    next_link: Option<String>,
}

#[derive(Deserialize)]
struct DirectoryObject {
    #[serde(rename = "@odata.type", default)]
    object_type: String,
    #[serde(default)]
    id: Option<String>,
}

struct CacheEntry {
    groups: BTreeSet<String>,
    fetched_at: Instant,
}

/// Resolves the group ids a principal belongs to.
///
/// Lookups walk every membership page and keep only group objects; roles and
/// other directory objects are dropped. Results are cached per principal and
/// stale entries are evicted on access, not by a background task.
pub struct GroupMembershipResolver {
    throttle: Arc<ThrottledClient>,
    token: TokenProvider,
    graph_endpoint: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl GroupMembershipResolver {
    /// Create a resolver over the shared throttled executor.
    pub fn new(throttle: Arc<ThrottledClient>, settings: GraphSettings) -> Self {
        Self {
            token: TokenProvider::new(Arc::clone(&throttle), &settings),
            throttle,
            graph_endpoint: settings.graph_endpoint.trim_end_matches('/').to_string(),
            cache_ttl: settings.cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Group ids `principal_id` is a member of.
    ///
    /// A failed lookup is an error; an empty set means the directory really
    /// reported no groups.
    pub async fn resolve(&self, principal_id: &str) -> Result<BTreeSet<String>, GraphError> {
        {
            let mut cache = self.cache.lock().await;
            match cache.get(principal_id) {
                Some(entry) if entry.fetched_at.elapsed() < self.cache_ttl => {
                    tracing::debug!(principal = principal_id, "Serving groups from cache");
                    return Ok(entry.groups.clone());
                }
                Some(_) => {
                    cache.remove(principal_id);
                }
                None => {}
            }
        }

        let groups = self.fetch_groups(principal_id).await?;
        tracing::info!(
            principal = principal_id,
            groups = groups.len(),
            "Resolved group memberships"
        );
        self.cache.lock().await.insert(
            principal_id.to_string(),
            CacheEntry {
                groups: groups.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(groups)
    }

    async fn fetch_groups(&self, principal_id: &str) -> Result<BTreeSet<String>, GraphError> {
        let token = self.token.bearer_token().await?;
        let lookup_error = |source| GraphError::Lookup {
            principal: principal_id.to_string(),
            source,
        };

        let mut groups = BTreeSet::new();
        let mut url = format!("{}/users/{}/memberOf", self.graph_endpoint, principal_id);
        loop {
            let call = ApiCall::new(Method::GET, &url).auth(ApiAuth::Bearer(token.clone()));
            let response = self.throttle.submit(call).await.map_err(lookup_error)?;
            let page: MembershipPage = response.json_as().map_err(lookup_error)?;

            for object in page.value {
                if object.object_type == GROUP_TYPE
                    && let Some(id) = object.id
                {
                    groups.insert(id);
                }
            }
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(groups)
    }
}
