//! Security-trimmed search over the published index.

pub mod gateway;
pub mod types;

pub use gateway::SearchGateway;
pub use types::{
    PrincipalStatistics, SearchDisposition, SearchMode, SearchOutcome, SearchRequest,
};
