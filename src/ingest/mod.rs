//! PDF ingestion: OCR, page persistence, and corpus builds.

pub mod ocr;
pub mod pipeline;

pub use ocr::{MistralOcr, OcrPage, OcrProvider};
pub use pipeline::{IngestOutcome, IngestService};
