//! Directory API integration: service-principal tokens and group
//! membership lookups.

pub mod groups;
pub mod token;

pub use groups::GroupMembershipResolver;
pub use token::TokenProvider;

use crate::config::get_config;
use crate::throttle::CallError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while resolving a caller's directory context.
///
/// A failed lookup is always an error, never an empty set, so the search
/// layer can fail closed instead of serving an untrimmed or overcut result.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The service principal could not obtain a token.
    #[error("Token acquisition failed: {0}")]
    Token(CallError),
    /// The membership lookup itself failed.
    #[error("Group lookup failed for {principal}: {source}")]
    Lookup {
        /// Principal whose lookup failed.
        principal: String,
        /// Underlying call failure.
        source: CallError,
    },
}

/// Connection settings for the directory API.
#[derive(Debug, Clone)]
pub struct GraphSettings {
    /// Directory API base URL, version segment included.
    pub graph_endpoint: String,
    /// Authority host tokens are requested from.
    pub authority_host: String,
    /// Tenant the service principal lives in.
    pub tenant_id: String,
    /// Service principal client id.
    pub client_id: String,
    /// Service principal client secret.
    pub client_secret: String,
    /// OAuth scope requested with the token.
    pub scope: String,
    /// How long resolved memberships stay cached.
    pub cache_ttl: Duration,
}

impl GraphSettings {
    /// Settings drawn from the process configuration.
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            graph_endpoint: config.graph_endpoint.clone(),
            authority_host: config.authority_host.clone(),
            tenant_id: config.tenant_id.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: default_scope(&config.graph_endpoint),
            cache_ttl: Duration::from_secs(config.group_cache_ttl_secs),
        }
    }
}

/// Scope covering the whole directory API surface: the endpoint origin plus
/// `/.default`.
pub fn default_scope(graph_endpoint: &str) -> String {
    match reqwest::Url::parse(graph_endpoint) {
        Ok(url) => format!("{}/.default", url.origin().ascii_serialization()),
        Err(_) => format!("{}/.default", graph_endpoint.trim_end_matches('/')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_is_derived_from_the_endpoint_origin() {
        assert_eq!(
            default_scope("https://graph.microsoft.com/v1.0"),
            "https://graph.microsoft.com/.default"
        );
        assert_eq!(
            default_scope("http://127.0.0.1:8080/v1.0"),
            "http://127.0.0.1:8080/.default"
        );
    }
}
