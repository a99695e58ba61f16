//! Shared types for the embedding pipeline.

use crate::throttle::CallError;

/// Result of embedding one content unit, correlated back through `unit_id`.
///
/// The batch pipeline returns one outcome per submitted unit, in submission
/// order, so a failed unit never shifts its neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingOutcome {
    /// Identifier of the unit this outcome belongs to.
    pub unit_id: String,
    /// Produced vector; empty when the attempt failed.
    pub vector: Vec<f32>,
    /// Failure that stopped this unit, when present.
    pub error: Option<CallError>,
}

impl EmbeddingOutcome {
    /// Outcome for a successfully embedded unit.
    pub(crate) fn success(unit_id: String, vector: Vec<f32>) -> Self {
        Self {
            unit_id,
            vector,
            error: None,
        }
    }

    /// Outcome for a unit whose embedding attempt failed.
    pub(crate) fn failure(unit_id: String, error: CallError) -> Self {
        Self {
            unit_id,
            vector: Vec::new(),
            error: Some(error),
        }
    }

    /// Whether this unit produced a usable vector.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
