#![deny(missing_docs)]

//! Core library for the docgate ingestion service and search gateway.

/// Environment-driven configuration management.
pub mod config;
/// Document discovery, extraction, and content-unit building.
pub mod document;
/// Embedding client and batch pipeline.
pub mod embedding;
/// Directory token acquisition and group-membership resolution.
pub mod graph;
/// Search index schema, uploads, and queries.
pub mod index;
/// Structured logging and tracing setup.
pub mod logging;
/// Run counters exposed by the command-line surface.
pub mod metrics;
/// End-to-end ingestion orchestration.
pub mod pipeline;
/// Security-trimmed query gateway.
pub mod search;
/// Access-control filter construction.
pub mod security;
/// Throttled outbound HTTP execution.
pub mod throttle;
/// Vision-model image analysis.
pub mod vision;
