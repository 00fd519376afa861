//! OCR capability boundary. No real vision/OCR implementation ships here —
//! that dependency is explicitly out of scope — but the orchestrator needs
//! something to call during tests and the CLI demo.

use async_trait::async_trait;
use grading_types::{GradingError, OcrPageResult};

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Recognize text for each page image, identified by opaque object-storage
    /// key. Order of the result matches the order of `image_keys`.
    async fn recognize(&self, image_keys: &[String]) -> Result<Vec<OcrPageResult>, GradingError>;
}

/// Deterministic stand-in: echoes back the image key as the page "text" so
/// callers can assert on it without a real OCR backend.
pub struct EchoOcrProvider;

#[async_trait]
impl OcrProvider for EchoOcrProvider {
    async fn recognize(&self, image_keys: &[String]) -> Result<Vec<OcrPageResult>, GradingError> {
        Ok(image_keys
            .iter()
            .enumerate()
            .map(|(page_index, image_key)| OcrPageResult {
                page_index: page_index as u32,
                text: image_key.clone(),
                image_key: image_key.clone(),
            })
            .collect())
    }
}
