//! Image analysis: multimodal wire client plus batch fan-out.

pub mod client;
pub mod pipeline;
pub mod types;

pub use client::{VisionClient, VisionSettings};
pub use pipeline::VisionPipeline;
pub use types::{ImageAnalysis, VisionOutcome};
