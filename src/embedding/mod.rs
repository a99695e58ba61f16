//! Embedding generation: wire client plus batch fan-out.

pub mod client;
pub mod pipeline;
pub mod types;

pub use client::{EmbeddingClient, EmbeddingSettings};
pub use pipeline::EmbeddingPipeline;
pub use types::EmbeddingOutcome;
