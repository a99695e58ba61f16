//! Shared types for image analysis.

use crate::throttle::CallError;

/// Structured description of one analyzed image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAnalysis {
    /// Identifier of the source image.
    pub image_id: String,
    /// Source file the image was pulled from.
    pub source_file: String,
    /// One-based page the image appeared on.
    pub page_number: u32,
    /// Model-provided description of the image content.
    pub description: String,
    /// Text the model read out of the image, empty when none.
    pub extracted_text: String,
    /// Objects the model recognized.
    pub objects_detected: Vec<String>,
    /// Model-reported confidence in the analysis.
    pub confidence_score: f32,
    /// RFC3339 timestamp of the analysis.
    pub analyzed_at: String,
    /// Total tokens the analysis consumed.
    pub tokens_used: u64,
}

impl ImageAnalysis {
    /// Searchable text combining every analyzed facet.
    ///
    /// This string is what gets embedded and stored for the image's unit, so
    /// description, read text, and object labels all become retrievable.
    pub fn embedding_text(&self) -> String {
        let mut parts = Vec::new();
        if !self.description.trim().is_empty() {
            parts.push(format!("Image Description: {}", self.description.trim()));
        }
        if !self.extracted_text.trim().is_empty() {
            parts.push(format!("Extracted Text: {}", self.extracted_text.trim()));
        }
        if !self.objects_detected.is_empty() {
            parts.push(format!(
                "Objects Detected: {}",
                self.objects_detected.join(", ")
            ));
        }
        parts.join(" ")
    }
}

/// Result of analyzing one image, correlated back through `image_id`.
#[derive(Debug, Clone)]
pub struct VisionOutcome {
    /// Identifier of the image this outcome belongs to.
    pub image_id: String,
    /// Analysis produced for the image, when the attempt succeeded.
    pub analysis: Option<ImageAnalysis>,
    /// Failure that stopped this image, when present.
    pub error: Option<CallError>,
}

impl VisionOutcome {
    /// Outcome for a successfully analyzed image.
    pub(crate) fn success(image_id: String, analysis: ImageAnalysis) -> Self {
        Self {
            image_id,
            analysis: Some(analysis),
            error: None,
        }
    }

    /// Outcome for an image whose analysis failed.
    pub(crate) fn failure(image_id: String, error: CallError) -> Self {
        Self {
            image_id,
            analysis: None,
            error: Some(error),
        }
    }

    /// Whether this image produced an analysis.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}
