use serde::Deserialize;
use std::env;
use std::sync::OnceLock;
use thiserror::Error;

use crate::security::NO_ACCESS_SENTINEL;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Configuration values violate a documented constraint.
    #[error("Invalid configuration: {0}")]
    Constraint(String),
}

/// Runtime configuration for the docgate pipeline and gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the managed search service.
    pub search_endpoint: String,
    /// Admin/query key for the search service.
    pub search_api_key: String,
    /// Name of the search index holding document units.
    pub search_index: String,
    /// REST API version sent with every search service call.
    pub search_api_version: String,
    /// Number of documents per upload batch.
    pub upload_batch_size: usize,

    /// Full URL of the embeddings endpoint.
    pub embedding_endpoint: String,
    /// API key for the embeddings endpoint.
    pub embedding_api_key: String,
    /// Which wire dialect the embeddings endpoint speaks.
    pub embedding_flavor: ApiFlavor,
    /// Model identifier sent in the request body (required for the OpenAI flavor).
    pub embedding_model: Option<String>,
    /// Dimensionality every returned vector must have.
    pub embedding_dimension: usize,
    /// Maximum characters submitted per embedding request; longer text is truncated.
    pub embedding_max_chars: usize,

    /// Chat-completions endpoint used for image analysis; unset disables the vision stage.
    pub vision_endpoint: Option<String>,
    /// API key for the vision endpoint; falls back to the embedding key.
    pub vision_api_key: Option<String>,
    /// Token budget for each vision completion.
    pub vision_max_tokens: u32,
    /// Sampling temperature for vision completions.
    pub vision_temperature: f32,
    /// Image detail level requested from the vision model (`low` or `high`).
    pub vision_detail: String,

    /// Base URL of the directory API used for group membership lookups.
    pub graph_endpoint: String,
    /// Authority host used for token acquisition.
    pub authority_host: String,
    /// Directory tenant identifier.
    pub tenant_id: String,
    /// OAuth client identifier for the client-credentials grant.
    pub client_id: String,
    /// OAuth client secret for the client-credentials grant.
    pub client_secret: String,
    /// Seconds a cached group membership stays valid.
    pub group_cache_ttl_secs: u64,

    /// Group identifiers stamped onto ingested documents.
    pub document_groups: Vec<String>,
    /// Fallback group applied when `document_groups` is empty.
    pub default_group: Option<String>,

    /// Character budget per text chunk.
    pub chunk_size: usize,
    /// Characters of sliding overlap between adjacent chunks.
    pub chunk_overlap: usize,

    /// Upper bound on simultaneously in-flight outbound API calls.
    pub max_concurrent_requests: usize,
    /// Requests admitted per rate-limit window.
    pub rate_limit_requests: usize,
    /// Length of the rolling rate-limit window in seconds.
    pub rate_limit_window_secs: u64,
    /// Total attempts per call, first try included.
    pub retry_max_attempts: u32,
    /// Base backoff delay in milliseconds.
    pub retry_base_ms: u64,
    /// Ceiling on a single backoff delay in milliseconds.
    pub retry_cap_ms: u64,

    /// Directory scanned for PDF files during ingestion.
    pub pdf_dir: String,
    /// Upper bound on PDFs extracted concurrently.
    pub max_concurrent_documents: usize,
}

/// Wire dialects supported by the embeddings and vision endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    /// Deployment-scoped endpoints authenticated with an `api-key` header.
    Azure,
    /// `/v1`-style endpoints authenticated with a bearer token.
    OpenAI,
}

impl Config {
    /// Read every `DOCGATE_*` variable, apply defaults, and validate the result.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            search_endpoint: load_env("DOCGATE_SEARCH_ENDPOINT")?,
            search_api_key: load_env("DOCGATE_SEARCH_API_KEY")?,
            search_index: load_env_optional("DOCGATE_SEARCH_INDEX")
                .unwrap_or_else(|| "docgate-units".to_string()),
            search_api_version: load_env_optional("DOCGATE_SEARCH_API_VERSION")
                .unwrap_or_else(|| "2024-07-01".to_string()),
            upload_batch_size: parse_env_or("DOCGATE_UPLOAD_BATCH_SIZE", 100)?,
            embedding_endpoint: load_env("DOCGATE_EMBEDDING_ENDPOINT")?,
            embedding_api_key: load_env("DOCGATE_EMBEDDING_API_KEY")?,
            embedding_flavor: load_env_optional("DOCGATE_EMBEDDING_FLAVOR")
                .unwrap_or_else(|| "azure".to_string())
                .parse()
                .map_err(|()| ConfigError::InvalidValue("DOCGATE_EMBEDDING_FLAVOR".to_string()))?,
            embedding_model: load_env_optional("DOCGATE_EMBEDDING_MODEL"),
            embedding_dimension: parse_env_or("DOCGATE_EMBEDDING_DIMENSION", 1536)?,
            embedding_max_chars: parse_env_or("DOCGATE_EMBEDDING_MAX_CHARS", 7000)?,
            vision_endpoint: load_env_optional("DOCGATE_VISION_ENDPOINT"),
            vision_api_key: load_env_optional("DOCGATE_VISION_API_KEY"),
            vision_max_tokens: parse_env_or("DOCGATE_VISION_MAX_TOKENS", 1000)?,
            vision_temperature: parse_env_or("DOCGATE_VISION_TEMPERATURE", 0.1)?,
            vision_detail: load_env_optional("DOCGATE_VISION_DETAIL")
                .unwrap_or_else(|| "high".to_string()),
            graph_endpoint: load_env_optional("DOCGATE_GRAPH_ENDPOINT")
                .unwrap_or_else(|| "https://graph.microsoft.com/v1.0".to_string()),
            authority_host: load_env_optional("DOCGATE_AUTHORITY_HOST")
                .unwrap_or_else(|| "https://login.microsoftonline.com".to_string()),
            tenant_id: load_env("DOCGATE_TENANT_ID")?,
            client_id: load_env("DOCGATE_CLIENT_ID")?,
            client_secret: load_env("DOCGATE_CLIENT_SECRET")?,
            group_cache_ttl_secs: parse_env_or("DOCGATE_GROUP_CACHE_TTL_SECS", 1800)?,
            document_groups: load_env_optional("DOCGATE_DOCUMENT_GROUPS")
                .map(|raw| parse_group_list(&raw))
                .unwrap_or_default(),
            default_group: load_env_optional("DOCGATE_DEFAULT_GROUP"),
            chunk_size: parse_env_or("DOCGATE_CHUNK_SIZE", 1000)?,
            chunk_overlap: parse_env_or("DOCGATE_CHUNK_OVERLAP", 200)?,
            max_concurrent_requests: parse_env_or("DOCGATE_MAX_CONCURRENT_REQUESTS", 10)?,
            rate_limit_requests: parse_env_or("DOCGATE_RATE_LIMIT_REQUESTS", 100)?,
            rate_limit_window_secs: parse_env_or("DOCGATE_RATE_LIMIT_WINDOW_SECS", 60)?,
            retry_max_attempts: parse_env_or("DOCGATE_RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_ms: parse_env_or("DOCGATE_RETRY_BASE_MS", 1000)?,
            retry_cap_ms: parse_env_or("DOCGATE_RETRY_CAP_MS", 60_000)?,
            pdf_dir: load_env_optional("DOCGATE_PDF_DIR").unwrap_or_else(|| "pdfs".to_string()),
            max_concurrent_documents: parse_env_or("DOCGATE_MAX_CONCURRENT_DOCUMENTS", 5)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that individual parsers cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100..=8000).contains(&self.chunk_size) {
            return Err(ConfigError::Constraint(
                "chunk size must be between 100 and 8000 characters".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Constraint(
                "chunk overlap must be smaller than the chunk size".to_string(),
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::Constraint(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        if self.embedding_flavor == ApiFlavor::OpenAI && self.embedding_model.is_none() {
            return Err(ConfigError::Constraint(
                "the openai embedding flavor requires DOCGATE_EMBEDDING_MODEL".to_string(),
            ));
        }
        if self.max_concurrent_requests == 0
            || self.rate_limit_requests == 0
            || self.rate_limit_window_secs == 0
            || self.retry_max_attempts == 0
            || self.upload_batch_size == 0
            || self.max_concurrent_documents == 0
        {
            return Err(ConfigError::Constraint(
                "concurrency, rate-limit, retry, and batch settings must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.vision_temperature) {
            return Err(ConfigError::Constraint(
                "vision temperature must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.document_groups.is_empty() && self.default_group.is_none() {
            // Without a stamped group no principal could ever match a
            // document, and silently granting open access is worse.
            return Err(ConfigError::Constraint(
                "no access groups configured: set DOCGATE_DOCUMENT_GROUPS or DOCGATE_DEFAULT_GROUP"
                    .to_string(),
            ));
        }
        let reserved = self
            .document_groups
            .iter()
            .chain(self.default_group.as_ref())
            .any(|group| group == NO_ACCESS_SENTINEL);
        if reserved {
            return Err(ConfigError::Constraint(format!(
                "'{NO_ACCESS_SENTINEL}' is reserved and cannot be used as a group id"
            )));
        }
        Ok(())
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_group_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

impl std::str::FromStr for ApiFlavor {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "azure" => Ok(Self::Azure),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        search_endpoint = %config.search_endpoint,
        index = %config.search_index,
        embedding_flavor = ?config.embedding_flavor,
        groups = config.document_groups.len(),
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
impl Config {
    /// Fully populated configuration for unit tests across the crate.
    pub(crate) fn sample() -> Self {
        Self {
            search_endpoint: "https://search.example.net".into(),
            search_api_key: "search-key".into(),
            search_index: "docgate-units".into(),
            search_api_version: "2024-07-01".into(),
            upload_batch_size: 100,
            embedding_endpoint: "https://embed.example.net/embeddings".into(),
            embedding_api_key: "embed-key".into(),
            embedding_flavor: ApiFlavor::Azure,
            embedding_model: None,
            embedding_dimension: 1536,
            embedding_max_chars: 7000,
            vision_endpoint: None,
            vision_api_key: None,
            vision_max_tokens: 1000,
            vision_temperature: 0.1,
            vision_detail: "high".into(),
            graph_endpoint: "https://graph.example.net/v1.0".into(),
            authority_host: "https://login.example.net".into(),
            tenant_id: "tenant".into(),
            client_id: "client".into(),
            client_secret: "secret".into(),
            group_cache_ttl_secs: 1800,
            document_groups: vec!["group-a".into()],
            default_group: None,
            chunk_size: 1000,
            chunk_overlap: 200,
            max_concurrent_requests: 10,
            rate_limit_requests: 100,
            rate_limit_window_secs: 60,
            retry_max_attempts: 3,
            retry_base_ms: 1000,
            retry_cap_ms: 60_000,
            pdf_dir: "pdfs".into(),
            max_concurrent_documents: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_is_valid() {
        assert!(Config::sample().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_at_or_above_chunk_size() {
        let mut config = Config::sample();
        config.chunk_overlap = config.chunk_size;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Constraint(message)) if message.contains("overlap")
        ));
    }

    #[test]
    fn rejects_chunk_size_outside_range() {
        let mut config = Config::sample();
        config.chunk_size = 50;
        assert!(config.validate().is_err());
        config.chunk_size = 9000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_missing_access_groups() {
        let mut config = Config::sample();
        config.document_groups.clear();
        config.default_group = None;
        let error = config.validate().unwrap_err();
        assert!(error.to_string().contains("no access groups"));
    }

    #[test]
    fn default_group_alone_satisfies_access_rule() {
        let mut config = Config::sample();
        config.document_groups.clear();
        config.default_group = Some("fallback".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_reserved_sentinel_as_group_id() {
        let mut config = Config::sample();
        config.document_groups = vec![NO_ACCESS_SENTINEL.into()];
        assert!(config.validate().is_err());

        let mut config = Config::sample();
        config.default_group = Some(NO_ACCESS_SENTINEL.into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn openai_flavor_requires_model() {
        let mut config = Config::sample();
        config.embedding_flavor = ApiFlavor::OpenAI;
        config.embedding_model = None;
        assert!(config.validate().is_err());
        config.embedding_model = Some("text-embedding-3-small".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_vision_temperature() {
        let mut config = Config::sample();
        config.vision_temperature = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_flavor_names_case_insensitively() {
        assert_eq!("Azure".parse::<ApiFlavor>(), Ok(ApiFlavor::Azure));
        assert_eq!("OPENAI".parse::<ApiFlavor>(), Ok(ApiFlavor::OpenAI));
        assert!("local".parse::<ApiFlavor>().is_err());
    }

    #[test]
    fn group_list_parsing_trims_and_drops_empties() {
        assert_eq!(
            parse_group_list(" group-a, group-b ,,group-c"),
            vec!["group-a", "group-b", "group-c"]
        );
        assert!(parse_group_list("  ").is_empty());
    }
}
