//! Document ingestion boundary: extraction, cleaning, chunking, and
//! content-unit construction.

mod chunking;
pub mod extract;
pub mod types;
pub mod units;

pub use extract::{DocumentExtractor, PdfTextExtractor, discover_pdfs};
pub use types::{ContentUnit, ExtractError, ExtractedDocument, ExtractedImage, PageText, UnitKind};
pub use units::{UnitBuilder, UnitError};
