//! Managed search index integration: schema, batch uploads, and queries.

pub mod publisher;
pub mod service;
pub mod types;

pub use publisher::IndexPublisher;
pub use service::{IndexSettings, SearchIndexService};
pub use types::{
    DocumentStatus, FacetBucket, IndexDocument, IndexHit, IndexPage, IndexQuery, UploadReport,
};
